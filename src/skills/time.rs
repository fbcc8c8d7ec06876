use chrono::{Datelike, Local};

use super::{Skill, SkillContext};
use crate::kernel::intent::handler::Handler;
use crate::kernel::intent::types::IntentSpec;

const TIME_FORMAT: &str = "%-I:%M %p";

/// English ordinal suffix; the teens always take "th".
pub fn day_suffix(day: u32) -> &'static str {
    if (day / 10) % 10 == 1 {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// Local time and date.
#[derive(Debug, Default)]
pub struct TimeSkill;

impl TimeSkill {
    pub fn new() -> Self {
        Self
    }
}

impl Skill for TimeSkill {
    fn name(&self) -> &str {
        "time"
    }

    fn register(&self, ctx: &mut SkillContext<'_>) -> anyhow::Result<()> {
        ctx.register_intent(
            IntentSpec::vocab("time"),
            Handler::from_result(|_, package| {
                package.add_result("time", Local::now().format(TIME_FORMAT).to_string());
                Ok(())
            }),
        )?;

        ctx.register_intent(
            IntentSpec::templates(
                "date",
                &["what is the date", "what's the date today", "what day is it", "what is today's date"],
            ),
            Handler::from_result(|_, package| {
                let today = Local::now().date_naive();
                let year = today.year();
                package.add_result("day", today.day());
                package.add_result("day_suffix", day_suffix(today.day()));
                package.add_result("month", today.month());
                package.add_result("month_name", today.format("%B").to_string());
                package.add_result("year", year);
                package.add_result("year_short", format!("{:02}", year.rem_euclid(100)));
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
    fn test_day_suffix() {
        let cases = [(1, "st"), (2, "nd"), (3, "rd"), (4, "th"), (11, "th"), (12, "th"), (13, "th"), (21, "st"), (22, "nd"), (31, "st")];
        for (day, suffix) in cases {
            assert_eq!(day_suffix(day), suffix, "day {}", day);
        }
    }
}
