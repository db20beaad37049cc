//! desk-runner: headless driver for the DCA case desk.
//!
//! Usage:
//!   desk-runner --db desk.db --data-dir ./data
//!   desk-runner --db desk.db --ipc-mode
//!
//! In IPC mode each stdin line is one JSON command and each stdout line is
//! one JSON reply.

use anyhow::Result;
use dca_core::{
    allocation_engine::AllocationRequest,
    clock::DeskClock,
    config::DeskConfig,
    engine::DeskEngine,
    types::{AgencyId, AllocationMethod, CaseId, UserId},
};
use serde_json::json;
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    AllocateCase {
        case_id: CaseId,
        agency_id: Option<AgencyId>,
        acting_user_id: UserId,
        #[serde(default)]
        reason: Option<String>,
        method: AllocationMethod,
    },
    ListCases {
        #[serde(default = "default_status")]
        status: String,
        #[serde(default = "default_page")]
        page: u32,
        #[serde(default)]
        page_size: Option<u32>,
    },
    MetricsSnapshot,
    Dashboard,
    RefreshPerformance,
    Quit,
}

fn default_status() -> String {
    "all".into()
}

fn default_page() -> u32 {
    1
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = arg_value(&args, "--db").unwrap_or("desk.db");
    let data_dir = arg_value(&args, "--data-dir").unwrap_or("./data");

    let config = DeskConfig::load(data_dir)?;
    let mut engine = DeskEngine::open(db, config, DeskClock::system())?;

    if ipc_mode {
        run_ipc_loop(&mut engine)?;
    } else {
        println!("DCA case desk | desk-runner");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
        print_summary(&engine)?;
    }

    Ok(())
}

fn run_ipc_loop(engine: &mut DeskEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };

        if matches!(cmd, IpcCommand::Quit) {
            break;
        }
        let reply = handle_command(engine, cmd);
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

/// Desk errors become `{"error", "kind"}` replies; the loop keeps running.
fn handle_command(engine: &mut DeskEngine, cmd: IpcCommand) -> serde_json::Value {
    let result = match cmd {
        IpcCommand::AllocateCase {
            case_id,
            agency_id,
            acting_user_id,
            reason,
            method,
        } => {
            let req = AllocationRequest {
                case_id,
                agency_id,
                acting_user_id,
                reason,
                method,
            };
            Ok(serde_json::to_value(engine.allocate_case(&req)))
        }
        IpcCommand::ListCases {
            status,
            page,
            page_size,
        } => engine
            .list_cases_by_name(&status, page, page_size)
            .map(serde_json::to_value),
        IpcCommand::MetricsSnapshot => engine.metrics_snapshot().map(serde_json::to_value),
        IpcCommand::Dashboard => engine.dashboard().map(serde_json::to_value),
        IpcCommand::RefreshPerformance => engine
            .refresh_agency_performance()
            .map(serde_json::to_value),
        IpcCommand::Quit => unreachable!("quit handled by the loop"),
    };

    match result {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => json!({ "error": e.to_string(), "kind": "serialization" }),
        Err(e) => {
            log::warn!("desk-runner: command failed: {e}");
            json!({ "error": e.to_string(), "kind": e.kind() })
        }
    }
}

fn print_summary(engine: &DeskEngine) -> Result<()> {
    let dashboard = engine.dashboard()?;
    let totals = &dashboard.totals;
    let metrics = engine.metrics_snapshot()?;

    println!("=== PORTFOLIO ===");
    println!("  cases:            {}", totals.total_cases);
    println!("  active:           {}", totals.active_cases);
    println!("  amount due:       {:.2}", totals.total_due);
    println!("  recovered:        {:.2}", totals.total_recovered);
    println!();
    println!("=== RECENT CASES ===");
    if dashboard.recent_cases.is_empty() {
        println!("  (no cases)");
    }
    for c in &dashboard.recent_cases {
        println!(
            "  {} {} | {} | {:.2} due | {}",
            c.case_number, c.customer_name, c.agency_name, c.amount_due, c.status
        );
    }
    println!();
    println!("=== METRICS ===");
    println!("  recovery rate:    {:.2}%", metrics.recovery_rate);
    match metrics.average_recovery_time {
        Some(days) => println!("  avg recovery:     {days:.1} days"),
        None => println!("  avg recovery:     (no recovered cases)"),
    }
    println!("  sla compliance:   {:.2}%", metrics.sla_compliance);
    println!();
    println!("=== TOP AGENCIES ===");
    if metrics.top_agencies.is_empty() {
        println!("  (no active agencies)");
    }
    for (rank, a) in metrics.top_agencies.iter().enumerate() {
        println!(
            "  {}. {} {} | recovery {:.1}% | sla {:.1}%",
            rank + 1,
            a.code,
            a.name,
            a.recovery_rate,
            a.sla_compliance
        );
    }
    Ok(())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
