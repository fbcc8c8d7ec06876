use rand::seq::SliceRandom;
use rand::thread_rng;

use super::{Skill, SkillContext};
use crate::kernel::intent::handler::Handler;
use crate::kernel::intent::types::IntentSpec;

const JOKES: &[&str] = &[
    "There are 10 kinds of people: those who understand binary and those who don't.",
    "A SQL query walks into a bar, walks up to two tables and asks: can I join you?",
    "Why do programmers prefer dark mode? Because light attracts bugs.",
    "I would tell you a UDP joke, but you might not get it.",
    "The borrow checker and I have agreed to see other people. It did not let me.",
    "Why did the developer go broke? Because he used up all his cache.",
];

#[derive(Debug, Default)]
pub struct JokeSkill;

impl JokeSkill {
    pub fn new() -> Self {
        Self
    }
}

impl Skill for JokeSkill {
    fn name(&self) -> &str {
        "joke"
    }

    fn register(&self, ctx: &mut SkillContext<'_>) -> anyhow::Result<()> {
        ctx.register_intent(
            IntentSpec::keywords("joke", &["joke"], &["tell", "me", "another"]),
            Handler::from_result(|_, package| {
                let joke = JOKES
                    .choose(&mut thread_rng())
                    .ok_or_else(|| anyhow::anyhow!("no jokes available"))?;
                package.add_result("joke", *joke);
                Ok(())
            }),
        )?;
        ctx.register_alias(IntentSpec::templates("funny", &["make me laugh", "say something funny"]), "joke")?;
        Ok(())
    }
}
