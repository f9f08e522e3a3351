//! Executes decoded requests against the store, clock and scheduler.

use crate::calendar::DateTime;
use crate::clock::{self, Clock, ClockError, ClockGuard};
use crate::protocol::{Frame, FrameError, NackCode, Request};
use crate::scheduler::{PlanExecutor, PlanScheduler};
use crate::store::layout::{HOLIDAYS, MAX_HOLIDAYS};
use crate::store::records::MAX_RECORD_SIZE;
use crate::store::{
    self, EMPTY, FlowRule, Holiday, IntermittenceRule, Movement, NvStore, Plan, Record, Sequence,
    read_record, write_record,
};
use crate::telemetry::{ControllerEvent, EventSink, FallbackReason};

/// Where response frames go.
pub trait FrameSink {
    fn send(&mut self, frame: &Frame);
}

impl<T: FrameSink + ?Sized> FrameSink for &mut T {
    fn send(&mut self, frame: &Frame) {
        (**self).send(frame);
    }
}

/// Everything a command may read or change.
pub struct CommandContext<'a, S: ?Sized, C: ?Sized, X> {
    pub store: &'a mut S,
    pub clock: &'a mut C,
    pub guard: &'a ClockGuard,
    pub scheduler: &'a mut PlanScheduler,
    pub executor: &'a mut X,
}

/// Maps a framing failure to the NACK it deserves.
///
/// Only checksum and length failures carry a command byte worth answering;
/// anything else is line noise and is dropped.
#[must_use]
pub fn reject(error: FrameError) -> Option<Frame> {
    match error {
        FrameError::Checksum { command } => Some(Frame::nack(command, NackCode::Checksum)),
        FrameError::Length { command } => Some(Frame::nack(command, NackCode::InvalidLength)),
        FrameError::Trailer { .. } | FrameError::Malformed => None,
    }
}

/// Handles one request frame and sends exactly one response.
pub fn dispatch<S, C, X, F, E>(
    frame: &Frame,
    ctx: &mut CommandContext<'_, S, C, X>,
    out: &mut F,
    sink: &mut E,
) where
    S: NvStore + ?Sized,
    C: Clock + ?Sized,
    X: PlanExecutor,
    F: FrameSink + ?Sized,
    E: EventSink + ?Sized,
{
    let command = frame.command;
    let request = match Request::decode(command, &frame.payload) {
        Ok(request) => request,
        Err(code) => {
            nack(command, code, out, sink);
            return;
        }
    };

    if request == Request::FactoryReset {
        // Acknowledge before the long erase so the host is not left waiting.
        out.send(&Frame::ack(command));
        sink.record(ControllerEvent::CommandAccepted { command });
        store::erase_all(ctx.store);
        store::seed_factory_defaults(ctx.store);
        ctx.scheduler.reload_cache(ctx.store);
        ctx.executor.cancel_plan_change();
        ctx.executor.enter_fallback(FallbackReason::Commanded, sink);
        return;
    }

    match execute(request, ctx) {
        Ok(response) => {
            out.send(&response.unwrap_or_else(|| Frame::ack(command)));
            sink.record(ControllerEvent::CommandAccepted { command });
        }
        Err(code) => nack(command, code, out, sink),
    }
}

fn nack<F, E>(command: u8, code: NackCode, out: &mut F, sink: &mut E)
where
    F: FrameSink + ?Sized,
    E: EventSink + ?Sized,
{
    out.send(&Frame::nack(command, code));
    sink.record(ControllerEvent::CommandRejected {
        command,
        code: code.to_raw(),
    });
}

/// Runs a request; `Ok(None)` means a plain ACK.
fn execute<S, C, X>(
    request: Request,
    ctx: &mut CommandContext<'_, S, C, X>,
) -> Result<Option<Frame>, NackCode>
where
    S: NvStore + ?Sized,
    C: Clock + ?Sized,
{
    let command = request.code().to_raw();
    match request {
        Request::SaveControllerId(id) => {
            store::set_controller_id(ctx.store, id);
            Ok(None)
        }
        Request::ReadControllerId => {
            let id = store::controller_id(ctx.store);
            response(command, &[id]).map(Some)
        }
        Request::ReadTime => {
            let now = clock::read_guarded(ctx.guard, ctx.clock).map_err(clock_nack)?;
            response(command, &time_bytes(&now)).map(Some)
        }
        Request::SetTime(value) => {
            clock::set_guarded(ctx.guard, ctx.clock, &value).map_err(clock_nack)?;
            ctx.scheduler.reload_cache(ctx.store);
            Ok(None)
        }
        Request::SaveMovement { index, movement } => save(ctx.store, index, &movement),
        Request::ReadMovement(index) => read::<Movement, S>(ctx.store, command, index).map(Some),
        Request::SaveSequence { index, sequence } => {
            save(ctx.store, index, &sequence)?;
            ctx.scheduler.reload_cache(ctx.store);
            Ok(None)
        }
        Request::ReadSequence(index) => read::<Sequence, S>(ctx.store, command, index).map(Some),
        Request::SavePlan { index, plan } => {
            save(ctx.store, index, &plan)?;
            ctx.scheduler.reload_cache(ctx.store);
            Ok(None)
        }
        Request::ReadPlan(index) => read::<Plan, S>(ctx.store, command, index).map(Some),
        Request::SaveIntermittence { index, rule } => save(ctx.store, index, &rule),
        Request::ReadIntermittence(index) => {
            read::<IntermittenceRule, S>(ctx.store, command, index).map(Some)
        }
        Request::SaveHoliday { index, holiday } => {
            save(ctx.store, index, &holiday)?;
            ctx.scheduler.reload_cache(ctx.store);
            Ok(None)
        }
        Request::ReadHolidays => read_holidays(ctx.store, command).map(Some),
        Request::SaveFlowRule { index, rule } => save(ctx.store, index, &rule),
        Request::ReadFlowRule(index) => read::<FlowRule, S>(ctx.store, command, index).map(Some),
        // Handled before execution; the ACK has to precede the erase.
        Request::FactoryReset => Err(NackCode::ExecutionFailed),
    }
}

fn clock_nack(error: ClockError) -> NackCode {
    match error {
        ClockError::InvalidTime => NackCode::InvalidData,
        ClockError::Busy | ClockError::Unavailable => NackCode::ExecutionFailed,
    }
}

fn time_bytes(now: &DateTime) -> [u8; 7] {
    [
        now.hour,
        now.minute,
        now.second,
        now.day,
        now.month,
        now.year,
        now.weekday,
    ]
}

fn response(command: u8, payload: &[u8]) -> Result<Frame, NackCode> {
    Frame::new(command, payload).map_err(|_| NackCode::ExecutionFailed)
}

fn save<T: Record, S: NvStore + ?Sized>(
    store: &mut S,
    index: u8,
    record: &T,
) -> Result<Option<Frame>, NackCode> {
    write_record(store, usize::from(index), record).map_err(|_| NackCode::ExecutionFailed)?;
    Ok(None)
}

/// Echoes the command with `[index, record bytes...]`.
fn read<T: Record, S: NvStore + ?Sized>(
    store: &mut S,
    command: u8,
    index: u8,
) -> Result<Frame, NackCode> {
    let record: T =
        read_record(store, usize::from(index)).map_err(|_| NackCode::ExecutionFailed)?;
    let size = T::TABLE.record_size;
    let mut payload = [EMPTY; 1 + MAX_RECORD_SIZE];
    payload[0] = index;
    record.encode(&mut payload[1..=size]);
    response(command, &payload[..=size])
}

fn read_holidays<S: NvStore + ?Sized>(store: &mut S, command: u8) -> Result<Frame, NackCode> {
    let mut payload = [EMPTY; MAX_HOLIDAYS * HOLIDAYS.record_size];
    for (index, chunk) in payload.chunks_exact_mut(HOLIDAYS.record_size).enumerate() {
        let holiday: Holiday =
            read_record(store, index).map_err(|_| NackCode::ExecutionFailed)?;
        holiday.encode(chunk);
    }
    response(command, &payload)
}
