use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{RunningState, Skill, SkillContext, Trigger};
use crate::kernel::intent::handler::Handler;
use crate::kernel::intent::package::ResultPackage;
use crate::kernel::intent::types::{IntentMatch, IntentSpec};

/// How often a ringing alarm repeats until stopped.
pub const NOTIFY_DELAY: Duration = Duration::from_secs(10);

const SKILL: &str = "timer";

/// Seconds per unit named in `unit` ("5 minutes", "an hour", ...).
pub fn unit_seconds(unit: &str) -> Option<u64> {
    let unit = unit.to_lowercase();
    if unit.contains("sec") {
        Some(1)
    } else if unit.contains("min") {
        Some(60)
    } else if unit.contains("hour") {
        Some(60 * 60)
    } else {
        None
    }
}

pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim().to_lowercase();
    if let Ok(n) = text.parse() {
        return Some(n);
    }
    let n = match text.as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        _ => return None,
    };
    Some(n)
}

struct Alarm {
    id: u64,
    name: String,
    token: CancellationToken,
}

#[derive(Default)]
struct TimerState {
    next_id: AtomicU64,
    alarms: Mutex<Vec<Alarm>>,
}

impl TimerState {
    fn alarms(&self) -> MutexGuard<'_, Vec<Alarm>> {
        self.alarms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: u64) {
        self.alarms().retain(|a| a.id != id);
    }
}

/// Countdown timers. Setting one keeps presentation control until it rings;
/// a ringing alarm repeats until "stop".
#[derive(Default)]
pub struct TimerSkill {
    state: Arc<TimerState>,
}

impl TimerSkill {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alarms set and not yet stopped.
    pub fn pending(&self) -> usize {
        self.state.alarms().len()
    }
}

async fn ring(
    state: Arc<TimerState>,
    running: Arc<RunningState>,
    trigger: Trigger,
    id: u64,
    name: String,
    delay: Duration,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }
    info!("Timer '{}' finished", name);
    running.stop();

    loop {
        let mut package = ResultPackage::for_action(SKILL, "alarm.notify");
        package.add_result("name", name.clone());
        if !trigger.send(package) {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(NOTIFY_DELAY) => {}
        }
    }
    state.remove(id);
}

fn set_timer(
    state: &Arc<TimerState>,
    running: &Arc<RunningState>,
    trigger: &Trigger,
    candidate: &IntentMatch,
    package: &mut ResultPackage,
) -> anyhow::Result<()> {
    let number_text = candidate.slot("number").context("no duration given")?;
    let number = parse_number(number_text).with_context(|| format!("'{}' is not a number", number_text))?;
    let unit = candidate.slot("unit").context("no unit given")?;
    let seconds = unit_seconds(unit).with_context(|| format!("unknown time unit '{}'", unit))?;
    let name = candidate.slot("timer_type").unwrap_or("timer").to_string();
    let runtime = tokio::runtime::Handle::try_current().context("timers need a running engine")?;

    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let token = CancellationToken::new();
    state.alarms().push(Alarm {
        id,
        name: name.clone(),
        token: token.clone(),
    });

    running.start(package);
    package.add_result("number", number_text);
    package.add_result("unit", unit);
    package.add_result("name", name.clone());

    let delay = Duration::from_secs(number.saturating_mul(seconds));
    debug!("Timer '{}' set for {:?}", name, delay);
    runtime.spawn(ring(
        Arc::clone(state),
        Arc::clone(running),
        trigger.clone(),
        id,
        name,
        delay,
        token,
    ));
    Ok(())
}

impl Skill for TimerSkill {
    fn name(&self) -> &str {
        SKILL
    }

    fn register(&self, ctx: &mut SkillContext<'_>) -> anyhow::Result<()> {
        let running = ctx.running();
        let trigger = ctx.trigger();

        let state = Arc::clone(&self.state);
        let set_running = Arc::clone(&running);
        ctx.register_intent(
            IntentSpec::templates(
                "set.timer",
                &[
                    "set a timer for {number} {unit}",
                    "set a {timer_type} timer for {number} {unit}",
                    "start a timer for {number} {unit}",
                ],
            ),
            Handler::from_result(move |candidate, package| {
                set_timer(&state, &set_running, &trigger, candidate, package)
            }),
        )?;

        let probe = Arc::clone(&self.state);
        let state = Arc::clone(&self.state);
        ctx.register_intent(
            IntentSpec::keywords("stop", &["stop"], &["timer", "alarm"]),
            Handler::new(
                move |_| Ok(Some(if probe.alarms().is_empty() { 0.0 } else { 0.8 })),
                move |_, package| {
                    let stopped: Vec<Alarm> = state.alarms().drain(..).collect();
                    for alarm in &stopped {
                        alarm.token.cancel();
                        info!("Stopped timer '{}'", alarm.name);
                    }
                    running.stop();
                    package.add_result("count", stopped.len());
                    Ok(())
                },
            ),
        )?;

        let state = Arc::clone(&self.state);
        ctx.register_intent(
            IntentSpec::keywords("list.timers", &["timers"], &["list", "what", "my", "active"]),
            Handler::from_result(move |_, package| {
                let names: Vec<String> = state.alarms().iter().map(|a| a.name.clone()).collect();
                if names.is_empty() {
                    package.set_action("no.timers");
                } else {
                    package.add_result("count", names.len());
                    package.add_result("names", names.join(", "));
                }
                Ok(())
            }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_and_numbers() {
        assert_eq!(unit_seconds("minutes"), Some(60));
        assert_eq!(unit_seconds("Seconds"), Some(1));
        assert_eq!(unit_seconds("hours"), Some(3600));
        assert_eq!(unit_seconds("days"), None);
        assert_eq!(parse_number("15"), Some(15));
        assert_eq!(parse_number("five"), Some(5));
        assert_eq!(parse_number("an"), Some(1));
        assert_eq!(parse_number("lots"), None);
    }
}
