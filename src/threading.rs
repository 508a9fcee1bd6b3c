//! OS-level scheduling class applied to pool worker threads.

use serde::{Deserialize, Serialize};

/// How aggressively worker threads compete for CPU time.
///
/// `Normal` leaves the OS default untouched. `Elevated` asks for a
/// round-robin real-time slot so ready tasks are picked up promptly even on a
/// loaded host; `Realtime` requests the strongest class the platform offers
/// and is only appropriate when task deadlines outrank everything else running
/// on the machine. Real-time classes need the right OS capabilities; without
/// them the request fails silently and workers stay at the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerPriority {
    #[default]
    Normal,
    Elevated,
    Realtime,
}

/// Apply `priority` to the calling worker thread.
///
/// On Linux the priority value is derived from the range the kernel reports
/// for the chosen policy: `Elevated` takes the midpoint of `SCHED_RR`,
/// `Realtime` the maximum of `SCHED_FIFO`. On macOS the classes map to QoS
/// (`USER_INITIATED` and `USER_INTERACTIVE`). Other platforms are a no-op.
pub fn set_worker_priority(priority: WorkerPriority) {
    if priority == WorkerPriority::Normal {
        return;
    }
    #[cfg(target_os = "linux")]
    {
        use libc::{
            pthread_self, pthread_setschedparam, sched_get_priority_max, sched_get_priority_min,
            sched_param, SCHED_FIFO, SCHED_RR,
        };

        let policy = match priority {
            WorkerPriority::Realtime => SCHED_FIFO,
            _ => SCHED_RR,
        };
        unsafe {
            let min = sched_get_priority_min(policy);
            let max = sched_get_priority_max(policy);
            if min < 0 || max < min {
                return;
            }
            let sched_priority = match priority {
                WorkerPriority::Realtime => max,
                _ => min + (max - min) / 2,
            };
            let mut param: sched_param = std::mem::zeroed();
            param.sched_priority = sched_priority;
            let _ = pthread_setschedparam(pthread_self(), policy, &param);
        }
    }
    #[cfg(target_os = "macos")]
    {
        const QOS_CLASS_USER_INTERACTIVE: u32 = 0x21;
        const QOS_CLASS_USER_INITIATED: u32 = 0x19;

        let qos_class = match priority {
            WorkerPriority::Realtime => QOS_CLASS_USER_INTERACTIVE,
            _ => QOS_CLASS_USER_INITIATED,
        };
        unsafe {
            extern "C" {
                fn pthread_set_qos_class_self_np(qos_class: u32, relative_priority: i32) -> i32;
            }

            let _ = pthread_set_qos_class_self_np(qos_class, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_normal() {
        assert_eq!(WorkerPriority::default(), WorkerPriority::Normal);
    }

    #[test]
    fn every_class_applies_without_panicking() {
        for priority in [
            WorkerPriority::Normal,
            WorkerPriority::Elevated,
            WorkerPriority::Realtime,
        ] {
            set_worker_priority(priority);
        }
    }
}
