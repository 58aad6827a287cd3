use crate::process::{ProcessSnapshot, RunningProcessInfo};

/// Picks the `top_n` apps the user is most plausibly using right now.
///
/// The frontmost app leads when it is a regular, unhidden app. The remaining
/// slots go to regular, unhidden apps with a real on-screen window, newest pid
/// first. A higher pid is only a proxy for "launched more recently"; macOS
/// does not expose activation history here.
pub fn rank(snapshot: &ProcessSnapshot, top_n: usize) -> Vec<String> {
    let mut ranked: Vec<String> = Vec::with_capacity(top_n);
    if top_n == 0 {
        return ranked;
    }

    let frontmost = snapshot
        .frontmost()
        .filter(|p| p.is_user_facing())
        .and_then(|p| p.bundle_path.clone());
    if let Some(path) = frontmost {
        ranked.push(path);
    }

    let mut candidates: Vec<&RunningProcessInfo> = snapshot
        .processes
        .iter()
        .filter(|p| Some(p.pid) != snapshot.frontmost_pid)
        .filter(|p| p.is_user_facing() && p.has_substantial_window())
        .collect();
    candidates.sort_by(|a, b| b.pid.cmp(&a.pid));

    for process in candidates {
        if ranked.len() >= top_n {
            break;
        }
        let Some(path) = process.bundle_path.as_deref() else {
            continue;
        };
        if !ranked.iter().any(|existing| existing == path) {
            ranked.push(path.to_string());
        }
    }

    ranked.truncate(top_n);
    ranked
}
