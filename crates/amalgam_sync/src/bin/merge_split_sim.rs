//! # Merge / Split Simulation
//!
//! Runs a two-player session on the loopback network: player one splits
//! its army and merges it back up, player two watches. Prints the
//! authority's counters and both replicas' view at the end.
//!
//! ```text
//! merge_split_sim [--units N] [--table attributes.toml] [--config engine.toml] [--realtime]
//! ```

use std::process::ExitCode;
use std::time::Instant;

use amalgam_core::{AttributeTable, PeerId, Unit, Vec3};
use amalgam_sync::{resolve_pairs, EngineConfig, EngineError, EngineResult, Session, TickLoop};

struct Args {
    units: u32,
    table: Option<String>,
    config: Option<String>,
    realtime: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        units: 8,
        table: None,
        config: None,
        realtime: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--units" => {
                let value = iter.next().ok_or("--units needs a value")?;
                args.units = value
                    .parse()
                    .map_err(|_| format!("invalid unit count: {value}"))?;
            }
            "--table" => args.table = Some(iter.next().ok_or("--table needs a path")?),
            "--config" => args.config = Some(iter.next().ok_or("--config needs a path")?),
            "--realtime" => args.realtime = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            eprintln!("usage: merge_split_sim [--units N] [--table FILE] [--config FILE] [--realtime]");
            return ExitCode::from(2);
        }
    };

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(left) => {
            eprintln!("{left} mergeable pair(s) left unmerged");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns the number of mergeable pairs still left at the end.
fn run(args: &Args) -> EngineResult<usize> {
    let table = match &args.table {
        Some(path) => AttributeTable::from_toml_file(path)?,
        None => AttributeTable::default(),
    };
    let config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         AMALGAM - MERGE / SPLIT SIMULATION                       ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Starting Units:     {}", args.units);
    println!("│ Tick Rate:          {} Hz", config.tick_rate);
    println!("│ Capacity:           {}", table.capacity);
    println!("│ Max Rank:           {}", table.max_rank());
    println!("│ Realtime:           {}", args.realtime);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let tick_rate = config.tick_rate;
    let mut session = Session::new(config, table)?;
    let player = session.add_peer()?;
    let observer = session.add_peer()?;

    for i in 0..args.units {
        let position = Vec3::new(i as f32 * 2.0, 0.0, 0.0);
        session.spawn_unit(Unit::new(player).with_team(0, 0), position);
    }
    session.settle()?;

    let started = Instant::now();
    let mut pacer = args.realtime.then(|| TickLoop::new(tick_rate));

    let splits = phase(&mut session, player, Phase::Split)?;
    let split_steps = drive(&mut session, pacer.as_mut())?;
    println!("Split phase:  {splits} requested, settled in {split_steps} ticks");

    let mut merge_round = 0;
    loop {
        let accepted = session.authority().stats().accepted;
        let merges = phase(&mut session, player, Phase::Merge)?;
        if merges == 0 {
            break;
        }
        merge_round += 1;
        let steps = drive(&mut session, pacer.as_mut())?;
        println!("Merge round {merge_round}: {merges} requested, settled in {steps} ticks");

        // Every pair was refused (e.g. ranks past the end of the table)
        if session.authority().stats().accepted == accepted {
            break;
        }
    }
    println!();

    Ok(report(&session, player, observer, started))
}

#[derive(Clone, Copy)]
enum Phase {
    Split,
    Merge,
}

/// Selects the player's whole pool and sends one batch of requests.
fn phase(session: &mut Session, player: PeerId, phase: Phase) -> EngineResult<usize> {
    let peer = session
        .peer_mut(player)
        .ok_or(EngineError::MissingCollaborator("player peer"))?;

    let units: Vec<_> = peer.pool().iter().collect();
    peer.selection_mut().set(units);

    let sent = match phase {
        Phase::Split => peer.request_splits()?.len(),
        Phase::Merge => peer.request_merges()?.len(),
    };
    peer.selection_mut().clear();
    Ok(sent)
}

/// Steps the session until every transition has committed.
fn drive(session: &mut Session, pacer: Option<&mut TickLoop>) -> EngineResult<u32> {
    const MAX_STEPS: u32 = 60 * 60;

    let Some(pacer) = pacer else {
        return session.run_until_quiet(MAX_STEPS);
    };

    let mut steps = 0;
    while steps < MAX_STEPS && (steps == 0 || !session.is_quiet()) {
        while pacer.should_tick() {
            let start = pacer.begin_tick();
            session.step()?;
            pacer.end_tick(start);
            steps += 1;
        }
        pacer.wait_for_next_tick();
    }
    Ok(steps)
}

fn report(session: &Session, player: PeerId, observer: PeerId, started: Instant) -> usize {
    let stats = session.authority().stats();

    println!("┌─ AUTHORITY ─────────────────────────────────────────────────────┐");
    println!("│ Accepted:           {}", stats.accepted);
    println!("│ Rejected:           {}", stats.rejected);
    println!("│ Commits:            {}", stats.commits);
    println!("│ Duplicate Commits:  {}", stats.duplicate_commits);
    println!("│ Snapshots Sent:     {}", stats.replicated);
    println!("│ Total Ticks:        {}", session.ticks());
    println!("│ Wall Time:          {:.2} ms", started.elapsed().as_secs_f64() * 1000.0);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let registry = session.authority().registry();
    let mut ranks: Vec<u32> = registry
        .iter()
        .filter(|(_, u)| u.owner == player)
        .map(|(_, u)| u.rank)
        .collect();
    ranks.sort_unstable();

    // Equal-rank pairs the table still has a row for
    let army: Vec<_> = registry
        .iter()
        .filter(|(_, u)| u.owner == player)
        .map(|(id, _)| id)
        .collect();
    let max_rank = session.authority().table().max_rank();
    let left = resolve_pairs(&army, registry)
        .iter()
        .filter(|pair| registry.get(pair.owner).is_some_and(|u| u.rank < max_rank))
        .count();

    println!("┌─ ARMY ──────────────────────────────────────────────────────────┐");
    println!("│ Units:              {}", ranks.len());
    println!("│ Ranks:              {ranks:?}");
    let status = if left == 0 { "✓ FULLY MERGED" } else { "✗ PAIRS LEFT" };
    println!("│ Mergeable Pairs:    {left} {status}");
    for id in [player, observer] {
        if let Some(peer) = session.peer(id) {
            let agrees = registry
                .iter()
                .all(|(unit, u)| peer.registry().get(unit).map(|r| r.rank) == Some(u.rank));
            let status = if agrees { "✓ CONSISTENT" } else { "✗ DIVERGED" };
            println!("│ Replica {id}:     {status}");
        }
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    left
}
