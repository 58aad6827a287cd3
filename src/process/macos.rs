use chrono::{DateTime, Utc};
use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::geometry::CGRect;
use core_graphics::window::{
    copy_window_info, kCGNullWindowID, kCGWindowBounds, kCGWindowIsOnscreen, kCGWindowLayer,
    kCGWindowListExcludeDesktopElements, kCGWindowListOptionOnScreenOnly, kCGWindowOwnerPID,
};
use objc2_app_kit::{NSApplicationActivationPolicy, NSRunningApplication, NSWorkspace};
use std::collections::HashMap;

use crate::error::MonitorError;

use super::{ActivationPolicy, ProcessSnapshot, ProcessSnapshotSource, RunningProcessInfo, TerminateMode, WindowInfo};

/// Native source: `NSWorkspace` for the app list, Quartz window services for geometry.
///
/// `NSWorkspace.runningApplications` is refreshed by the main run loop, so the
/// host process is expected to be running one (as any menu-bar app does).
pub struct MacOsProcessSource;

impl MacOsProcessSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacOsProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSnapshotSource for MacOsProcessSource {
    fn snapshot(&self) -> Result<ProcessSnapshot, MonitorError> {
        let mut windows = on_screen_windows();

        let (frontmost_pid, processes) = unsafe {
            let workspace = NSWorkspace::sharedWorkspace();
            let frontmost_pid = workspace
                .frontmostApplication()
                .and_then(|app| u32::try_from(app.processIdentifier()).ok());

            let running = workspace.runningApplications();
            let processes: Vec<RunningProcessInfo> = running
                .iter()
                .filter_map(|app| {
                    // Terminated apps linger in the list until the run loop catches up.
                    if app.isTerminated() {
                        return None;
                    }
                    let pid = u32::try_from(app.processIdentifier()).ok()?;
                    Some(RunningProcessInfo {
                        pid,
                        bundle_path: app
                            .bundleURL()
                            .and_then(|url| url.path())
                            .map(|path| path.to_string()),
                        name: app.localizedName().map(|name| name.to_string()),
                        hidden: app.isHidden(),
                        activation_policy: activation_policy(app.activationPolicy()),
                        launched_at: app.launchDate().and_then(|date| {
                            let secs = date.timeIntervalSince1970();
                            DateTime::from_timestamp_millis((secs * 1000.0) as i64)
                        }),
                        windows: windows.remove(&pid).unwrap_or_default(),
                    })
                })
                .collect();

            (frontmost_pid, processes)
        };

        Ok(ProcessSnapshot::new(Utc::now(), frontmost_pid, processes))
    }

    fn send_terminate(&self, pid: u32, mode: TerminateMode) -> Result<(), MonitorError> {
        let raw_pid = i32::try_from(pid).map_err(|_| MonitorError::signal(pid, mode, "pid out of range"))?;

        let accepted = unsafe {
            let Some(app) = NSRunningApplication::runningApplicationWithProcessIdentifier(raw_pid) else {
                return Err(MonitorError::signal(pid, mode, "no such application"));
            };
            match mode {
                TerminateMode::Graceful => app.terminate(),
                TerminateMode::Forceful => app.forceTerminate(),
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(MonitorError::signal(pid, mode, "request refused"))
        }
    }
}

fn activation_policy(policy: NSApplicationActivationPolicy) -> ActivationPolicy {
    if policy == NSApplicationActivationPolicy::Regular {
        ActivationPolicy::Regular
    } else if policy == NSApplicationActivationPolicy::Accessory {
        ActivationPolicy::Accessory
    } else {
        ActivationPolicy::Prohibited
    }
}

/// Groups the current on-screen windows by owning pid.
fn on_screen_windows() -> HashMap<u32, Vec<WindowInfo>> {
    let mut by_pid: HashMap<u32, Vec<WindowInfo>> = HashMap::new();

    let Some(list) = copy_window_info(
        kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements,
        kCGNullWindowID,
    ) else {
        log::debug!("window list unavailable this cycle");
        return by_pid;
    };

    let (owner_key, layer_key, bounds_key, onscreen_key) = unsafe {
        (
            CFString::wrap_under_get_rule(kCGWindowOwnerPID),
            CFString::wrap_under_get_rule(kCGWindowLayer),
            CFString::wrap_under_get_rule(kCGWindowBounds),
            CFString::wrap_under_get_rule(kCGWindowIsOnscreen),
        )
    };

    for raw in list.iter() {
        let entry: CFDictionary<CFString, CFType> =
            unsafe { CFDictionary::wrap_under_get_rule(*raw as CFDictionaryRef) };

        let Some(pid) = entry
            .find(&owner_key)
            .and_then(|v| v.downcast::<CFNumber>())
            .and_then(|n| n.to_i64())
            .and_then(|n| u32::try_from(n).ok())
        else {
            continue;
        };

        let layer = entry
            .find(&layer_key)
            .and_then(|v| v.downcast::<CFNumber>())
            .and_then(|n| n.to_i64())
            .unwrap_or(0);

        let on_screen = entry
            .find(&onscreen_key)
            .and_then(|v| v.downcast::<CFBoolean>())
            .map(bool::from)
            .unwrap_or(true);

        let rect = entry
            .find(&bounds_key)
            .and_then(|v| v.downcast::<CFDictionary>())
            .and_then(|dict| CGRect::from_dict_representation(&dict));

        let (width, height) = rect.map(|r| (r.size.width, r.size.height)).unwrap_or((0.0, 0.0));

        by_pid.entry(pid).or_default().push(WindowInfo {
            layer,
            on_screen,
            width,
            height,
        });
    }

    by_pid
}
