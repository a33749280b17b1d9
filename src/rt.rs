/*!
    Process-wide real-time setup: scheduling elevation and the interrupt wiring.

    Both concerns are global to the process and must happen exactly once, before the loop
    starts, so they are modeled as an explicit init-once context instead of free functions
    mutating hidden state. Elevation is not reversible within the same run.

    ```ignore
    let rt = RtContext::init(Priority::Realtime)?;
    rt.catch_interrupt(master.stop_handle())?;
    master.run(|cycle| { ... })?;
    ```

    On non-Linux targets both operations degrade to warnings, the loop itself stays portable.
*/

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering::*};
use log::warn;

use crate::error::{MasterError, MasterResult};
use crate::master::StopHandle;


/// scheduling class applied to the control thread
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Priority {
    /// highest regular priority, still preemptible by the kernel scheduler
    High,
    /// fixed-priority FIFO class, the thread cannot be preempted by regular work
    Realtime,
}

static CLAIMED: AtomicBool = AtomicBool::new(false);
static INTERRUPT: OnceLock<StopHandle> = OnceLock::new();

/**
    token proving the process-wide real-time state was initialized

    Only one instance can ever be created per process. Holding it is what allows registering
    the interrupt handler, so the wiring order (elevate, then arm cancellation, then run)
    is visible in the caller's code.
*/
pub struct RtContext {
    priority: Priority,
}
impl RtContext {
    /// elevate the current thread once for the whole process
    pub fn init(priority: Priority) -> MasterResult<Self> {
        if CLAIMED.swap(true, SeqCst) {
            return Err(MasterError::Configuration("real-time context already initialized"));
        }
        elevate(priority)?;
        Ok(Self {priority})
    }

    /// the scheduling class applied at init
    pub fn priority(&self) -> Priority {self.priority}

    /// route SIGINT to the given stop handle, once per process
    ///
    /// each received signal invokes stop exactly once, the loop then finishes its current
    /// cycle and exits reporting the final elapsed time and cycle count
    pub fn catch_interrupt(&self, stop: StopHandle) -> MasterResult<()> {
        INTERRUPT.set(stop)
            .map_err(|_| MasterError::Configuration("interrupt handler already registered"))?;
        install_handler()
    }
}

#[cfg(target_os = "linux")]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    // only atomics in here, anything else is not signal safe
    if let Some(stop) = INTERRUPT.get() {
        stop.stop();
    }
}

#[cfg(target_os = "linux")]
fn elevate(priority: Priority) -> MasterResult<()> {
    use thread_priority::*;

    match priority {
        Priority::High => {
            set_current_thread_priority(ThreadPriority::Max)
                .map_err(|_| MasterError::Configuration("failed to raise thread priority"))?;
        }
        Priority::Realtime => {
            set_thread_priority_and_policy(
                thread_native_id(),
                ThreadPriority::Max,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
                ).map_err(|_| MasterError::Configuration("failed to switch the thread to fifo scheduling"))?;
        }
    }
    // io priority matters as much as cpu priority here since the frame exchange performs io
    // from the control thread, but a refusal is survivable
    if ioprio::set_priority(
        ioprio::Target::Process(ioprio::Pid::this()),
        ioprio::Priority::new(ioprio::Class::Realtime(ioprio::RtPriorityLevel::highest())),
        ).is_err() {
        warn!("could not raise io priority, continuing with the default class");
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn elevate(_priority: Priority) -> MasterResult<()> {
    warn!("scheduling elevation is not supported on this platform");
    Ok(())
}

#[cfg(target_os = "linux")]
fn install_handler() -> MasterResult<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::empty(),
        SigSet::empty(),
        );
    unsafe {sigaction(Signal::SIGINT, &action)}
        .map_err(|_| MasterError::Configuration("failed to install the interrupt handler"))?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn install_handler() -> MasterResult<()> {
    warn!("interrupt catching is not supported on this platform, use stop handles directly");
    Ok(())
}
