use std::path::Path;
use std::process::{ExitCode, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info};
use logfan::{LeveledLog, LogFanout, LogLevel, LogRecord, SessionOpts};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Context stamped on every record. Defaults to the program name.
    #[arg(short, long)]
    context: Option<String>,

    /// Number of records the broadcast bus buffers for slow consumers
    #[arg(long, default_value_t = logfan::DEFAULT_BUS_CAPACITY as u32)]
    bus_capacity: u32,

    /// Prints every published record to stdout as it arrives
    #[arg(long, default_value_t = false)]
    panel: bool,

    /// Enables debug logging
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// How long output readers may keep going once the command has exited or
/// been killed. Background processes can hold the pipes open indefinitely.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// What the interceptor saw while the command ran.
#[derive(Default)]
struct Observed {
    counts: [usize; 5],
    last_error: Option<LogRecord>,
}

impl Observed {
    fn observe(&mut self, record: &LogRecord) {
        self.counts[record.level as usize] += 1;
        if record.level >= LogLevel::Error {
            self.last_error = Some(record.clone());
        }
    }

    fn summary(&self) -> String {
        LogLevel::ALL
            .iter()
            .map(|level| format!("{}={}", level, self.counts[*level as usize]))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let program = args.command[0].clone();
    let context = args.context.clone().unwrap_or_else(|| {
        Path::new(&program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.clone())
    });

    let opts = SessionOpts {
        context,
        bus_capacity: args.bus_capacity,
        debug: args.debug,
    };

    let log_level = if opts.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = TermLogger::init(
        log_level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    let session = match logfan::new_with_current_runtime(opts) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create session: {}", e);
            return ExitCode::from(2);
        }
    };

    let panel_done = CancellationToken::new();
    let panel = args
        .panel
        .then(|| tokio::spawn(run_panel(session.subscribe(), panel_done.clone(), print_line)));

    let fanout = session.logger();
    let observed = Arc::new(Mutex::new(Observed::default()));
    let code = {
        let observed = observed.clone();
        let _intercept = fanout.intercept(move |record| {
            observed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .observe(record);
        });

        supervise(&args.command, &fanout, &session, READER_DRAIN_GRACE).await
    };

    panel_done.cancel();
    if let Some(panel) = panel {
        let _ = panel.await;
    }

    if let Err(e) = session.shutdown().await {
        error!("Failed to shut down session: {}", e);
    }

    let observed = observed.lock().unwrap_or_else(|e| e.into_inner());
    info!("Records while {} ran: {}", program, observed.summary());

    if code != 0 {
        if let Some(record) = &observed.last_error {
            error!("Last error from {}: {}", program, record.message);
        }
    }

    ExitCode::from(code)
}

/// Runs the command, logging stdout at info and stderr at error, until it
/// exits or Ctrl-C is received.
async fn supervise(
    command: &[String],
    fanout: &Arc<LogFanout>,
    session: &logfan::Session,
    drain_grace: Duration,
) -> u8 {
    let mut child = match Command::new(&command[0])
        .args(&command[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            fanout.fatal(format_args!("Failed to start {}: {}", command[0], e));
            return 127;
        }
    };

    debug!("Started {} (pid {:?})", command[0], child.id());

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pipe_lines(stdout, fanout.clone(), LogLevel::Info)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pipe_lines(stderr, fanout.clone(), LogLevel::Error)));
    }

    let status = tokio::select! {
        status = child.wait() => Some(status),
        _ = tokio::signal::ctrl_c() => None,
    };

    if status.is_none() {
        info!("Ctrl-C received, stopping {}...", command[0]);
        session.cancel();
        if let Err(e) = child.kill().await {
            error!("Failed to kill {}: {}", command[0], e);
        }
    }

    if !join_readers(readers, drain_grace).await {
        info!("Stopped reading output of {}; a background process still holds it", command[0]);
    }

    match status {
        Some(Ok(status)) => {
            fanout.info(format_args!("{} exited with {}", command[0], status));
            exit_code(status.code())
        }
        Some(Err(e)) => {
            fanout.error(format_args!("Failed to wait for {}: {}", command[0], e));
            1
        }
        None => 130,
    }
}

async fn pipe_lines<R>(reader: R, fanout: Arc<LogFanout>, level: LogLevel) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        fanout.emit(level, format_args!("{line}"));
    }
    Ok(())
}

/// Waits for the output readers until they finish, `grace` runs out, or
/// another Ctrl-C arrives. Readers still running then are aborted. Returns
/// whether every reader finished on its own.
async fn join_readers(readers: Vec<JoinHandle<std::io::Result<()>>>, grace: Duration) -> bool {
    let aborts: Vec<_> = readers.iter().map(|reader| reader.abort_handle()).collect();

    let joined = async {
        for reader in readers {
            match reader.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Failed to read command output: {}", e),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Output reader failed: {}", e),
            }
        }
    };

    let finished = tokio::select! {
        result = tokio::time::timeout(grace, joined) => result.is_ok(),
        _ = tokio::signal::ctrl_c() => false,
    };

    if !finished {
        for abort in aborts {
            abort.abort();
        }
    }
    finished
}

/// Exit codes outside 0..=255 (Windows, or none at all after a signal) map to 1.
fn exit_code(code: Option<i32>) -> u8 {
    code.and_then(|c| u8::try_from(c).ok()).unwrap_or(1)
}

fn print_line(line: String) {
    println!("{line}");
}

/// Prints records live, then drains whatever is still buffered once `done` fires.
async fn run_panel<F>(mut rx: broadcast::Receiver<LogRecord>, done: CancellationToken, mut out: F)
where
    F: FnMut(String),
{
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Ok(record) => out(record.to_string()),
                Err(RecvError::Lagged(skipped)) => out(format!("... {skipped} records skipped")),
                Err(RecvError::Closed) => break,
            },
            _ = done.cancelled() => {
                drain_buffered(&mut rx, &mut out);
                break;
            }
        }
    }
}

fn drain_buffered<F>(rx: &mut broadcast::Receiver<LogRecord>, out: &mut F)
where
    F: FnMut(String),
{
    loop {
        match rx.try_recv() {
            Ok(record) => out(record.to_string()),
            Err(TryRecvError::Lagged(skipped)) => out(format!("... {skipped} records skipped")),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logfan::LogBus;
    use std::time::Instant;

    #[test]
    fn exit_codes_are_clamped() {
        assert_eq!(exit_code(Some(0)), 0);
        assert_eq!(exit_code(Some(3)), 3);
        assert_eq!(exit_code(Some(256)), 1);
        assert_eq!(exit_code(Some(0xC000_0005_u32 as i32)), 1);
        assert_eq!(exit_code(Some(-1)), 1);
        assert_eq!(exit_code(None), 1);
    }

    #[test]
    fn observed_counts_levels_and_keeps_last_error() {
        let mut observed = Observed::default();
        observed.observe(&LogRecord::new("git", LogLevel::Info, "cloning"));
        observed.observe(&LogRecord::new("git", LogLevel::Error, "remote hung up"));
        observed.observe(&LogRecord::new("git", LogLevel::Fatal, "aborting"));
        observed.observe(&LogRecord::new("git", LogLevel::Info, "done"));

        assert_eq!(
            observed.summary(),
            "DEBUG=0 INFO=2 WARN=0 ERROR=1 FATAL=1"
        );
        assert_eq!(observed.last_error.unwrap().message, "aborting");
    }

    #[test]
    fn drain_keeps_going_after_lag() {
        let bus = LogBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(LogRecord::new("ctx", LogLevel::Info, i.to_string()));
        }

        let mut lines = Vec::new();
        drain_buffered(&mut rx, &mut |line| lines.push(line));

        assert_eq!(
            lines,
            vec![
                "... 3 records skipped".to_string(),
                "[ctx] INFO 3".to_string(),
                "[ctx] INFO 4".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn panel_prints_buffered_records_after_done() {
        let bus = LogBus::new(8);
        let rx = bus.subscribe();
        let done = CancellationToken::new();

        bus.publish(LogRecord::new("ctx", LogLevel::Warn, "slow disk"));
        done.cancel();

        let mut lines = Vec::new();
        run_panel(rx, done, |line| lines.push(line)).await;

        assert_eq!(lines, vec!["[ctx] WARN slow disk".to_string()]);
    }

    #[tokio::test]
    async fn stuck_readers_are_aborted_after_grace() {
        let stuck = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok::<(), std::io::Error>(())
        });
        let abort = stuck.abort_handle();

        let started = Instant::now();
        let finished = join_readers(vec![stuck], Duration::from_millis(50)).await;

        assert!(!finished);
        assert!(started.elapsed() < Duration::from_secs(2));
        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn finished_readers_join_within_grace() {
        let done = tokio::spawn(async { Ok::<(), std::io::Error>(()) });
        assert!(join_readers(vec![done], Duration::from_secs(1)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_process_does_not_hold_up_exit() {
        let session = logfan::new_with_current_runtime(SessionOpts {
            context: "sh".to_string(),
            ..SessionOpts::default()
        })
        .unwrap();
        let mut rx = session.subscribe();
        let fanout = session.logger();
        let command: Vec<String> = ["sh", "-c", "sleep 5 & echo started"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let started = Instant::now();
        let code = supervise(&command, &fanout, &session, Duration::from_millis(200)).await;

        assert_eq!(code, 0);
        assert!(started.elapsed() < Duration::from_secs(4));

        let mut messages = Vec::new();
        while let Ok(record) = rx.try_recv() {
            messages.push(record.message);
        }
        assert!(messages.iter().any(|m| m == "started"));
        assert!(messages.iter().any(|m| m.starts_with("sh exited with")));
    }
}
