use super::{Skill, SkillContext};
use crate::kernel::intent::handler::Handler;
use crate::kernel::intent::types::IntentMatch;

const QUESTION_WORDS: &[&str] = &["what", "who", "where", "when", "why", "how", "which", "is", "are", "can", "do", "does"];

/// Last resort for queries shaped like a question that nothing else answered.
#[derive(Debug, Default)]
pub struct UnknownSkill;

impl UnknownSkill {
    pub fn new() -> Self {
        Self
    }
}

fn looks_like_question(candidate: &IntentMatch) -> bool {
    let query = candidate.query.trim();
    query.ends_with('?')
        || query
            .split_whitespace()
            .next()
            .map_or(false, |first| QUESTION_WORDS.contains(&first))
}

impl Skill for UnknownSkill {
    fn name(&self) -> &str {
        "unknown"
    }

    fn register(&self, ctx: &mut SkillContext<'_>) -> anyhow::Result<()> {
        ctx.register_fallback(Handler::new(
            |candidate| Ok(Some(if looks_like_question(candidate) { 0.5 } else { 0.0 })),
            |candidate, package| {
                package.add_result("query", candidate.query.clone());
                Ok(())
            },
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::intent::types::IntentName;

    #[test]
    fn test_question_shape() {
        let q = |text: &str| looks_like_question(&IntentMatch::raw(IntentName::fallback("unknown"), text));
        assert!(q("what is the meaning of life"));
        assert!(q("the meaning of life?"));
        assert!(!q("turn on the lights"));
    }
}
