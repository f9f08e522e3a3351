mod session;
mod sim;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use signal_core::calendar::DateTime;

use session::Session;

/// Power-up time when `--at` is not given: Monday 3 March 2025, 07:59.
const DEFAULT_START: DateTime = DateTime::new(7, 59, 0, 3, 3, 25, 1);

struct Options {
    start: DateTime,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: signal-emulator [--at \"HH:MM:SS DD/MM/YY W\"] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options.start, options.transcript.as_deref())?;
    let mut line = String::new();

    writeln!(
        writer,
        "Signal Controller Emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for status in session.boot_banner() {
        writeln!(writer, "{status}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        start: DEFAULT_START,
        transcript: None,
    };
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--at" => {
                let value = args.next().ok_or("Expected value after --at")?;
                options.start = sim::parse_date_time(&value)?;
            }
            "--transcript" => {
                let value = args.next().ok_or("Expected value after --transcript")?;
                options.transcript = Some(PathBuf::from(value));
            }
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }
    Ok(options)
}
