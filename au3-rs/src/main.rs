use au3::cli::{self, CliArgs};
use au3::console::{ConsoleHost, Signals};
use au3::script::{Interpreter, Script};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Fatal script error.
const EXIT_FATAL: i32 = 1;
/// Bad command line.
const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("au3: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(EXIT_USAGE);
        }
    };

    init_logging(args.debug);

    let signals = Signals::default();
    tokio::spawn(watch_signals(signals.clone()));

    // The interpreter is single-threaded and blocks in host idles; keep it
    // off the async workers.
    let code = tokio::task::block_in_place(|| run_script(&args, signals));
    std::process::exit(code);
}

/// `AU3_LOG` wins; otherwise `warn`, or `debug` with `-d`.  Logs go to
/// stderr so script output on stdout stays clean.
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("AU3_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_script(args: &CliArgs, signals: Signals) -> i32 {
    let (config, warnings) = match cli::build_config(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("au3: {e}");
            return EXIT_USAGE;
        }
    };
    if !args.quiet {
        for w in &warnings {
            warn!("config: {w}");
        }
    }

    let script = match Script::load(&args.script, &config.include_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e.report());
            return EXIT_FATAL;
        }
    };
    debug!(path = %args.script.display(), lines = script.len(), units = script.unit_count(), "loaded");

    let host = ConsoleHost::new(signals);
    let mut interp = match Interpreter::new(script, config, Box::new(host)) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("{}", e.report());
            return EXIT_FATAL;
        }
    };
    interp.set_cmdline(&args.script_args);

    match interp.run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.report());
            EXIT_FATAL
        }
    }
}

/// Ctrl-C quits the script; SIGUSR1 toggles pause.
async fn watch_signals(signals: Signals) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot watch SIGUSR1");
                if tokio::signal::ctrl_c().await.is_ok() {
                    signals.request_quit();
                }
                return;
            }
        };
        loop {
            tokio::select! {
                r = tokio::signal::ctrl_c() => {
                    if r.is_ok() {
                        debug!("interrupt: quitting");
                        signals.request_quit();
                    }
                    return;
                }
                Some(()) = usr1.recv() => {
                    let paused = signals.toggle_pause();
                    debug!(paused, "SIGUSR1");
                }
            }
        }
    }
    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_ok() {
        signals.request_quit();
    }
}
