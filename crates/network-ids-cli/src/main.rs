//! Interactive command-line demo harness for `network-ids-core`.

use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::*;
use network_ids_core::{NetworkIds, Severity};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, Level};

#[derive(Parser)]
#[command(name = "network-ids")]
#[command(about = "Network Intrusion Detection System - Interactive CLI")]
#[command(version = "0.1.0")]
struct Cli {}

struct Session {
    ids: Arc<NetworkIds>,
    running: bool,
    demo_traffic: Option<JoinHandle<()>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(false)
        .init();

    let _cli = Cli::parse();
    print_banner();

    let session = Arc::new(Mutex::new(Session {
        ids: Arc::new(NetworkIds::new()),
        running: false,
        demo_traffic: None,
    }));

    run_interactive_shell(session).await
}

fn print_banner() {
    println!("{}", "============================================".bright_cyan());
    println!("{}", "  Network Intrusion Detection System - CLI  ".bright_cyan());
    println!("{}", "============================================".bright_cyan());
    println!();
    println!("{}", "Type 'help' for available commands, 'exit' to quit".bright_black());
    println!();
}

async fn run_interactive_shell(session: Arc<Mutex<Session>>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();

    loop {
        let running = session.lock().await.running;
        let prompt = if running {
            format!("{} ", "ids>".bright_green().bold())
        } else {
            format!("{} ", "ids>".bright_red().bold())
        };
        print!("{prompt}");
        use std::io::Write;
        std::io::stdout().flush()?;

        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("failed to read line: {e}");
                continue;
            }
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        match handle_command(command, Arc::clone(&session)).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => println!("{} {}", "Error:".bright_red().bold(), e),
        }
    }

    println!("\n{}", "Shutting down...".yellow());
    let mut sess = session.lock().await;
    if let Some(handle) = sess.demo_traffic.take() {
        handle.abort();
    }
    if sess.running {
        let _ = sess.ids.stop().await;
    }
    println!("{}", "Goodbye!".bright_green());
    Ok(())
}

async fn handle_command(command: &str, session: Arc<Mutex<Session>>) -> Result<bool> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(false);
    }

    match parts[0] {
        "help" | "h" | "?" => print_help(),
        "start" => start_ids(session, &parts[1..]).await?,
        "stop" => stop_ids(session).await?,
        "status" | "s" => show_status(session).await?,
        "block" => mutate_addr(session, parts.get(1), AddrOp::Block).await?,
        "allow" => mutate_addr(session, parts.get(1), AddrOp::Allow).await?,
        "dossier" => show_dossier(session, parts.get(1)).await?,
        "alerts" => show_alerts(session, &parts[1..]).await?,
        "clear" | "cls" => {
            print!("\x1B[2J\x1B[1;1H");
            print_banner();
        }
        "exit" | "quit" | "q" => return Ok(true),
        _ => {
            println!("{} unknown command: '{}'", "Error:".bright_red().bold(), parts[0]);
            println!("Type 'help' for available commands");
        }
    }

    Ok(false)
}

fn print_help() {
    println!("\n{}", "Available Commands:".bright_cyan().bold());
    println!();
    println!("  {}               Start the IDS ticker", "start".bright_green());
    println!("                        Options: --demo (inject synthetic traffic)");
    println!();
    println!("  {}                Stop the IDS ticker", "stop".bright_green());
    println!();
    println!("  {}              Show system status", "status".bright_green());
    println!();
    println!("  {} <ip>           Block a source address", "block".bright_green());
    println!("  {} <ip>           Allow a source address", "allow".bright_green());
    println!("  {} <ip>         Show a source's dossier", "dossier".bright_green());
    println!();
    println!("  {}             Show recent alerts", "alerts".bright_green());
    println!("                        Options: --limit <n>");
    println!();
    println!("  {}               Clear screen", "clear".bright_green());
    println!("  {}                Exit the CLI", "exit".bright_green());
    println!();
}

async fn start_ids(session: Arc<Mutex<Session>>, args: &[&str]) -> Result<()> {
    let mut sess = session.lock().await;
    if sess.running {
        println!("{}", "IDS is already running!".yellow());
        return Ok(());
    }

    sess.ids.start().await?;
    sess.running = true;

    if args.contains(&"--demo") {
        let ids = Arc::clone(&sess.ids);
        sess.demo_traffic = Some(tokio::spawn(async move { run_demo_traffic(ids).await }));
        println!("{}", "  Mode: synthetic traffic demo".bright_black());
    }

    println!("{}", "IDS started".bright_green());
    Ok(())
}

/// Ingests a steady stream of plausible-looking TCP frames from a handful of
/// synthetic sources, purely so `status`/`alerts`/`dossier` have something to
/// show without real capture hardware.
async fn run_demo_traffic(ids: Arc<NetworkIds>) {
    let sources = [[198, 51, 100, 10], [198, 51, 100, 11], [203, 0, 113, 77]];
    loop {
        let mut rng = rand::thread_rng();
        let src = sources[rng.gen_range(0..sources.len())];
        let port: u16 = rng.gen_range(1..=1024);
        let frame = demo_frame(src, [10, 0, 0, 1], port);
        ids.ingest(&frame).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

fn demo_frame(src: [u8; 4], dst: [u8; 4], dst_port: u16) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    let mut ip = vec![0u8; 20];
    ip[0] = (4 << 4) | 5;
    ip[8] = 64;
    ip[9] = 6;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);
    frame.extend(ip);
    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&12345u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[12] = 5 << 4;
    tcp[13] = 0x02;
    frame.extend(tcp);
    frame
}

async fn stop_ids(session: Arc<Mutex<Session>>) -> Result<()> {
    let mut sess = session.lock().await;
    if !sess.running {
        println!("{}", "IDS is not running".yellow());
        return Ok(());
    }

    if let Some(handle) = sess.demo_traffic.take() {
        handle.abort();
    }
    sess.ids.stop().await?;
    sess.running = false;
    println!("{}", "IDS stopped".bright_green());
    Ok(())
}

async fn show_status(session: Arc<Mutex<Session>>) -> Result<()> {
    let sess = session.lock().await;
    let status = sess.ids.status().await;

    println!("\n{}", "System Status:".bright_cyan().bold());
    println!("{}", "=".repeat(50).bright_black());
    println!("Monitoring:  {}", if status.monitoring_active { "active".bright_green() } else { "stopped".bright_red() });
    println!("Total packets:     {}", status.stats.total_packets.to_string().bright_white());
    println!("Suspicious:        {}", status.stats.suspicious_packets.to_string().bright_red());
    println!("Blocked addrs:     {}", status.stats.blocked_count.to_string().bright_white());
    println!("Active sources:    {}", status.stats.active_sources.to_string().bright_white());
    println!("Last scan:         {}", status.stats.last_scan.bright_white());
    println!(
        "Baseline:          {} ({:.0}%)",
        if status.anomaly_status.baseline_established { "established".bright_green() } else { "learning".yellow() },
        status.anomaly_status.baseline_progress_percent
    );
    println!("Recent anomalies:  {}", status.anomaly_status.recent_anomaly_count.to_string().bright_white());
    println!();
    Ok(())
}

enum AddrOp {
    Block,
    Allow,
}

async fn mutate_addr(session: Arc<Mutex<Session>>, addr: Option<&&str>, op: AddrOp) -> Result<()> {
    let Some(addr) = addr else {
        println!("{}", "Usage: block|allow <ip>".yellow());
        return Ok(());
    };
    let addr: Ipv4Addr = match addr.parse() {
        Ok(addr) => addr,
        Err(_) => {
            println!("{} not an IPv4 address: {}", "Error:".bright_red().bold(), addr);
            return Ok(());
        }
    };

    let sess = session.lock().await;
    match op {
        AddrOp::Block => match sess.ids.block(addr).await {
            Ok(()) => println!("{} {}", "Blocked".bright_green(), addr),
            Err(e) => println!("{} {}", "Error:".bright_red().bold(), e),
        },
        AddrOp::Allow => {
            sess.ids.allow(addr).await;
            println!("{} {}", "Allowed".bright_green(), addr);
        }
    }
    Ok(())
}

async fn show_dossier(session: Arc<Mutex<Session>>, addr: Option<&&str>) -> Result<()> {
    let Some(addr) = addr else {
        println!("{}", "Usage: dossier <ip>".yellow());
        return Ok(());
    };
    let addr: Ipv4Addr = match addr.parse() {
        Ok(addr) => addr,
        Err(_) => {
            println!("{} not an IPv4 address: {}", "Error:".bright_red().bold(), addr);
            return Ok(());
        }
    };

    let sess = session.lock().await;
    match sess.ids.dossier(addr).await {
        Some(snapshot) => {
            println!("\n{} {}", "Dossier:".bright_cyan().bold(), addr);
            println!("  status:       {:?}", snapshot.status);
            println!("  classification: {:?}", snapshot.classification);
            println!("  ports touched: {}", snapshot.ports_touched.len());
            println!("  notes: {}", if snapshot.notes.is_empty() { "(none)" } else { &snapshot.notes });
        }
        None => println!("{}", "No dossier for that address yet".bright_black()),
    }
    Ok(())
}

async fn show_alerts(session: Arc<Mutex<Session>>, args: &[&str]) -> Result<()> {
    let sess = session.lock().await;
    let mut limit = 10usize;
    for (i, arg) in args.iter().enumerate() {
        if *arg == "--limit" {
            if let Some(n) = args.get(i + 1) {
                limit = n.parse().unwrap_or(10);
            }
        }
    }

    let status = sess.ids.status().await;
    let alerts: Vec<_> = status.recent_alerts.into_iter().take(limit).collect();
    if alerts.is_empty() {
        println!("{}", "No alerts to display".bright_black());
        return Ok(());
    }

    println!("\n{} (showing {})", "Recent Alerts:".bright_cyan().bold(), alerts.len());
    println!("{}", "-".repeat(70).bright_black());
    for (i, alert) in alerts.iter().enumerate() {
        let color = match alert.severity {
            Severity::High => "red",
            Severity::Medium => "yellow",
            Severity::Low => "white",
        };
        println!("\n{} {} {}", format!("{}.", i + 1).bright_black(), format!("{:?}", alert.severity).color(color).bold(), alert.title.bright_white().bold());
        println!("   from: {}", alert.source_addr.bright_cyan());
        println!("   {}", alert.description.bright_black());
        println!("   status: {:?}", alert.status);
    }
    println!();
    Ok(())
}
