use codecrate::utils::error::{CodecrateError, format_error};
use codecrate::{cli, init_logging, run};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::args::parse();
    let verbose = args.verbose > 0;
    init_logging(args.verbose, args.quiet);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            display_error(&e, verbose);
            ExitCode::FAILURE
        }
    }
}

/// Display an error with contextual formatting.
///
/// Tries to downcast to `CodecrateError` for rich formatting, falls back to
/// anyhow's error chain display for other errors.
fn display_error(error: &anyhow::Error, verbose: bool) {
    if let Some(codecrate_error) = error.downcast_ref::<CodecrateError>() {
        // Context added on the way up still names the failing step
        let outer = error.to_string();
        let inner = codecrate_error.to_string();
        if outer != inner {
            eprintln!("\n\u{26a0} {}", outer);
        }
        eprintln!("{}", format_error(codecrate_error, verbose));
    } else {
        eprintln!("\n\u{26a0} Error: {}", error);

        let causes: Vec<_> = error.chain().skip(1).collect();
        if !causes.is_empty() {
            eprintln!("\nCaused by:");
            for (i, cause) in causes.iter().enumerate() {
                let prefix = if i == causes.len() - 1 {
                    "\u{2514}\u{2500}"
                } else {
                    "\u{251c}\u{2500}"
                };
                eprintln!("{} {}", prefix, cause);
            }
        }

        if verbose {
            let backtrace = error.backtrace();
            if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
                eprintln!("\nBacktrace:\n{}", backtrace);
            }
        }
    }
    eprintln!();
}
