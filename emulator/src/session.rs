use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use signal_core::calendar::DateTime;
use signal_core::clock::ClockGuard;
use signal_core::controller::Controller;
use signal_core::engine::EngineConfig;
use signal_core::inputs::{
    DEMAND_INPUTS, DebounceConfig, DemandLatch, MaintenanceSwitch, TickDivider, TickFlags,
};
use signal_core::protocol::{Frame, FrameReceiver, FrameSink, reject};
use signal_core::store::{PortFrame, RamStore};
use signal_core::telemetry::{EventId, TelemetryRecorder};

use crate::sim::{HostOutputs, SimInstant, SimulatedClock, VirtualPacer, parse_date_time};

const HALF_SECOND_MS: u64 = 500;
/// Upper bound for a single `run`, one day.
const MAX_RUN_SECONDS: u32 = 24 * 60 * 60;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "run",
        "run <seconds>                    - advance simulated time",
    ),
    (
        "time",
        "time [HH:MM:SS DD/MM/YY W]       - show or set the controller clock",
    ),
    (
        "demand",
        "demand <0-3>                     - latch a detector demand",
    ),
    (
        "switch",
        "switch <on|off>                  - hold the maintenance switch through debounce",
    ),
    (
        "send",
        "send <hex bytes>                 - feed raw bytes to the command link",
    ),
    (
        "frame",
        "frame <command> [payload hex]    - send a well-formed command frame",
    ),
    (
        "status",
        "status                           - display engine and scheduler state",
    ),
    (
        "events",
        "events                           - dump the telemetry ring",
    ),
    (
        "help",
        "help [topic]                     - show help for a command",
    ),
];

type HostController = Controller<HostOutputs, VirtualPacer>;

/// Collects response frames produced while handling a command.
#[derive(Default)]
struct Responses(Vec<Frame>);

impl FrameSink for Responses {
    fn send(&mut self, frame: &Frame) {
        self.0.push(frame.clone());
    }
}

/// One emulated controller: store, clock, inputs and the main loop state.
pub struct Session {
    store: RamStore,
    clock: SimulatedClock,
    guard: ClockGuard,
    demands: DemandLatch,
    flags: TickFlags,
    divider: TickDivider,
    switch: MaintenanceSwitch,
    receiver: FrameReceiver,
    controller: HostController,
    telemetry: TelemetryRecorder<SimInstant>,
    cursor: EventId,
    uptime_ms: u64,
    resets: usize,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(start: DateTime, transcript: Option<&Path>) -> io::Result<Self> {
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        let mut session = Self {
            store: RamStore::new(),
            clock: SimulatedClock::new(start),
            guard: ClockGuard::new(),
            demands: DemandLatch::new(),
            flags: TickFlags::new(),
            divider: TickDivider::new(),
            switch: MaintenanceSwitch::new(DebounceConfig::default()),
            receiver: FrameReceiver::new(),
            controller: new_controller(),
            telemetry: TelemetryRecorder::new(),
            cursor: 0,
            uptime_ms: 0,
            resets: 0,
            transcript,
            started_at: HostInstant::now(),
        };
        let lines = session.boot();
        session.record_output(Duration::ZERO, &lines)?;
        Ok(session)
    }

    /// Lines printed after power-up.
    pub fn boot_banner(&mut self) -> Vec<String> {
        self.status_lines()
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let (verb, rest) = trimmed
            .split_once(char::is_whitespace)
            .map_or((trimmed, ""), |(verb, rest)| (verb, rest.trim()));
        let result = match verb.to_ascii_lowercase().as_str() {
            "help" => Ok(help_lines((!rest.is_empty()).then_some(rest))),
            "run" => self.handle_run(rest),
            "time" => self.handle_time(rest),
            "demand" => self.handle_demand(rest),
            "switch" => self.handle_switch(rest),
            "send" => parse_hex(rest).map(|bytes| self.feed_bytes(&bytes)),
            "frame" => self.handle_frame_command(rest),
            "status" => Ok(self.status_lines()),
            "events" => Ok(self.event_lines()),
            other => Err(format!("unknown command `{other}` (try `help`)")),
        };

        let mut lines = match result {
            Ok(lines) => lines,
            Err(message) => vec![format!("ERR {message}")],
        };
        lines.extend(self.drain_telemetry());
        if self.controller.is_halted() {
            lines.extend(self.watchdog_reset());
        }

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn boot(&mut self) -> Vec<String> {
        let now = self.now();
        let report = self.controller.boot(
            &mut self.store,
            &mut self.clock,
            &self.guard,
            &mut self.telemetry.at(now),
        );
        let mut lines = vec![format!(
            "BOOT store={} decision={}",
            report.store,
            report
                .decision
                .map_or_else(|error| format!("clock error: {error}"), |d| d.to_string())
        )];
        lines.extend(self.drain_telemetry());
        lines
    }

    /// The maintenance switch halted the loop: the watchdog expires and the
    /// controller restarts with only the store surviving.
    fn watchdog_reset(&mut self) -> Vec<String> {
        self.resets += 1;
        self.uptime_ms += self.controller.engine_mut().pacer_mut().paused_ms();
        self.controller = new_controller();
        self.demands.clear_all();
        let _ = self.flags.take();
        self.divider = TickDivider::new();
        self.switch = MaintenanceSwitch::new(DebounceConfig::default());
        self.receiver.reset();

        let mut lines = vec![format!("WATCHDOG reset #{}", self.resets)];
        lines.extend(self.boot());
        lines
    }

    fn handle_run(&mut self, args: &str) -> Result<Vec<String>, String> {
        let seconds: u32 = args
            .parse()
            .map_err(|_| format!("expected a number of seconds, got `{args}`"))?;
        if seconds > MAX_RUN_SECONDS {
            return Err(format!("at most {MAX_RUN_SECONDS} seconds per run"));
        }

        let mut lines = Vec::new();
        for _ in 0..seconds * 2 {
            self.half_second();
            lines.extend(self.drain_telemetry());
            if self.controller.is_halted() {
                break;
            }
        }
        lines.push(format!(
            "{} {}",
            self.clock.current(),
            describe_frame(&self.controller.engine().outputs().last())
        ));
        Ok(lines)
    }

    fn half_second(&mut self) {
        self.uptime_ms += HALF_SECOND_MS;
        self.divider.on_half_second(&self.flags);
        let ticks = self.flags.take();
        if ticks.one_second {
            self.clock.advance_second();
        }
        let now = self.now();
        self.controller.step(
            &mut self.store,
            &mut self.clock,
            &self.guard,
            &self.demands,
            ticks,
            &mut self.telemetry.at(now),
        );
    }

    fn handle_time(&mut self, args: &str) -> Result<Vec<String>, String> {
        if args.is_empty() {
            return Ok(vec![self.clock.current().to_string()]);
        }
        let value = parse_date_time(args)?;
        signal_core::clock::set_guarded(&self.guard, &mut self.clock, &value)
            .map_err(|error| error.to_string())?;
        let now = self.now();
        self.controller
            .reschedule(
                &mut self.store,
                &mut self.clock,
                &self.guard,
                &mut self.telemetry.at(now),
            )
            .map(|decision| vec![format!("OK clock {value}"), format!("decision {decision}")])
            .map_err(|error| error.to_string())
    }

    fn handle_demand(&mut self, args: &str) -> Result<Vec<String>, String> {
        let index: usize = args
            .parse()
            .ok()
            .filter(|index| *index < DEMAND_INPUTS)
            .ok_or_else(|| format!("demand index must be 0-{}", DEMAND_INPUTS - 1))?;
        self.demands.set(index);
        Ok(vec![format!("OK demands={:04b}", self.demands.snapshot())])
    }

    fn handle_switch(&mut self, args: &str) -> Result<Vec<String>, String> {
        let pressed = match args.to_ascii_lowercase().as_str() {
            "on" => true,
            "off" => false,
            other => return Err(format!("expected `on` or `off`, got `{other}`")),
        };
        let threshold = DebounceConfig::default().maintenance_scans;
        let mut lines = Vec::new();
        for _ in 0..threshold {
            if let Some(action) = self.switch.scan(pressed) {
                let now = self.now();
                self.controller
                    .on_switch(action, &mut self.store, &mut self.telemetry.at(now));
                lines.push(format!("SWITCH {action:?}"));
            }
        }
        if lines.is_empty() {
            lines.push("switch unchanged".to_string());
        }
        Ok(lines)
    }

    fn handle_frame_command(&mut self, args: &str) -> Result<Vec<String>, String> {
        let bytes = parse_hex(args)?;
        let (&command, payload) = bytes
            .split_first()
            .ok_or_else(|| "expected a command byte".to_string())?;
        let frame = Frame::new(command, payload).map_err(|error| error.to_string())?;
        Ok(self.feed_bytes(&frame.encode()))
    }

    /// Pushes raw link bytes through the receiver and dispatches every frame
    /// that completes.
    fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut responses = Responses::default();
        for byte in bytes {
            match self.receiver.push(*byte) {
                Some(Ok(frame)) => {
                    let now = self.now();
                    let handled = self.controller.handle_frame(
                        &frame,
                        &mut self.store,
                        &mut self.clock,
                        &self.guard,
                        &mut responses,
                        &mut self.telemetry.at(now),
                    );
                    if !handled {
                        lines.push(format!(
                            "IGNORED 0x{:02X} during manual flash",
                            frame.command
                        ));
                    }
                }
                Some(Err(error)) => {
                    lines.push(format!("FRAME ERROR {error}"));
                    if let Some(nack) = reject(error) {
                        responses.send(&nack);
                    }
                }
                None => {}
            }
        }
        if !self.receiver.is_idle() {
            lines.push("(partial frame buffered)".to_string());
        }
        for frame in responses.0 {
            lines.push(format!("<- {}", to_hex(&frame.encode())));
        }
        lines
    }

    fn status_lines(&mut self) -> Vec<String> {
        let engine = self.controller.engine();
        let mut state = format!("engine {}", engine.state());
        if let Some(reason) = engine.fallback_reason() {
            let _ = write!(state, " ({reason})");
        }
        if let Some(plan) = engine.running_plan() {
            let _ = write!(state, " plan={plan}");
        }
        if let Some(current) = engine.current_movement() {
            let _ = write!(
                state,
                " movement={} step={} remaining={}s",
                current.index,
                current.step,
                engine.countdown()
            );
        }
        if let Some(change) = engine.pending_change() {
            let _ = write!(
                state,
                " pending=seq{}/anchor{}",
                change.sequence, change.selector
            );
        }

        let selected = self
            .controller
            .scheduler()
            .selected()
            .map_or_else(|| "none".to_string(), |plan| plan.to_string());
        let virtual_ms = self.now().0;
        vec![
            format!("clock {}", self.clock.current()),
            state,
            format!(
                "scheduler selected={selected} demands={:04b}",
                self.demands.snapshot()
            ),
            format!(
                "outputs {} writes={}",
                describe_frame(&self.controller.engine().outputs().last()),
                self.controller.engine().outputs().writes()
            ),
            format!("uptime {virtual_ms}ms resets={}", self.resets),
        ]
    }

    fn event_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .telemetry
            .oldest_first()
            .map(|record| format!("#{:<4} +{}ms {}", record.id, record.timestamp.0, record.event))
            .collect();
        if lines.is_empty() {
            lines.push("no events recorded".to_string());
        }
        lines
    }

    fn drain_telemetry(&mut self) -> Vec<String> {
        let lines = self
            .telemetry
            .since(self.cursor)
            .map(|record| format!("EVENT {}", record.event))
            .collect();
        self.cursor = self.telemetry.next_id();
        lines
    }

    /// Virtual uptime: ticks plus every blocking pause the engine asked for.
    fn now(&mut self) -> SimInstant {
        let paused = self.controller.engine_mut().pacer_mut().paused_ms();
        SimInstant(self.uptime_ms + paused)
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        let Some(transcript) = self.transcript.as_mut() else {
            return Ok(());
        };
        for line in lines {
            transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn new_controller() -> HostController {
    Controller::new(
        HostOutputs::default(),
        VirtualPacer::default(),
        EngineConfig::default(),
    )
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# Signal controller emulator transcript")?;
        writeln!(
            logger.writer,
            "# Timestamps are wall-clock milliseconds since session start"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

fn help_lines(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u8::from_str_radix(digits, 16).map_err(|_| format!("bad hex byte `{token}`"))
        })
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_frame(frame: &PortFrame) -> String {
    format!(
        "ports D={:02X} E={:02X} F={:02X} H={:02X} J={:02X}",
        frame.main[0], frame.main[1], frame.main[2], frame.aux[0], frame.aux[1]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONDAY_0759: DateTime = DateTime::new(7, 59, 0, 3, 3, 25, 1);

    fn session() -> Session {
        Session::new(MONDAY_0759, None).expect("session")
    }

    fn run(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).expect("command")
    }

    #[test]
    fn fresh_controller_boots_into_fallback() {
        let mut session = session();
        let status = session.boot_banner();
        assert_eq!(status[0], "clock 07:59:00 03/03/25 dow=1");
        assert!(status[1].starts_with("engine fallback (no-configuration)"));
    }

    #[test]
    fn frame_command_is_acknowledged() {
        let mut session = session();
        let lines = run(&mut session, "frame 40 00 07 01 00 08 00");
        assert!(lines.contains(&"<- 43 53 4F 06 01 40 47 03 FF".to_string()));
        assert!(lines.iter().any(|line| line.starts_with("EVENT ")));
    }

    #[test]
    fn corrupted_bytes_are_nacked() {
        let mut session = session();
        let lines = run(&mut session, "send 43 53 4F 10 01 2A 00 03 FF");
        assert!(lines.iter().any(|line| line.starts_with("FRAME ERROR")));
        assert!(lines.contains(&"<- 43 53 4F 15 02 10 01 28 03 FF".to_string()));
    }

    #[test]
    fn configured_plan_starts_at_the_next_minute() {
        let mut session = session();
        run(&mut session, "frame 23 01 24 00 00 00 00 09 09 09 09 09");
        run(
            &mut session,
            "frame 30 01 00 00 01 01 FF FF FF FF FF FF FF FF FF FF FF",
        );
        run(&mut session, "frame 40 00 07 01 00 08 00");
        run(&mut session, "run 60");
        let status = run(&mut session, "status");
        assert!(status[1].starts_with("engine running plan=0 movement=1"), "{status:?}");
    }

    #[test]
    fn releasing_the_maintenance_switch_resets_the_controller() {
        let mut session = session();
        let engaged = run(&mut session, "switch on");
        assert!(engaged.contains(&"SWITCH EngageManualFlash".to_string()));
        let released = run(&mut session, "switch off");
        assert!(released.contains(&"WATCHDOG reset #1".to_string()));
        assert!(released.iter().any(|line| line.starts_with("BOOT ")));
    }

    #[test]
    fn bad_input_is_reported_not_fatal() {
        let mut session = session();
        assert_eq!(run(&mut session, "demand 9"), ["ERR demand index must be 0-3"]);
        assert_eq!(
            run(&mut session, "send zz"),
            ["ERR bad hex byte `zz`"]
        );
        assert!(run(&mut session, "bogus")[0].starts_with("ERR unknown command"));
    }
}
