//! Prompt construction and bounded conversation context.

use crate::models::{
    Attachment, DiscussionFormat, ModerationLevel, Session, SessionSettings, Speaker,
};
use crate::services::providers::ContextMessage;

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(content: &str) -> u64 {
    (content.chars().count() as u64).div_ceil(4)
}

pub fn system_prompt(
    speaker: Speaker,
    topic: &str,
    description: &str,
    settings: &SessionSettings,
) -> String {
    let partner = speaker.opposite().display_name();

    let format = match settings.format {
        DiscussionFormat::Collaborative => format!(
            "Build on {}'s ideas, extend them and look for combinations neither of you would reach alone.",
            partner
        ),
        DiscussionFormat::Debate => format!(
            "Take a clear position and challenge {}'s arguments directly, conceding only to better evidence.",
            partner
        ),
        DiscussionFormat::Socratic => format!(
            "Advance the discussion mainly through probing questions that expose {}'s assumptions.",
            partner
        ),
    };

    let moderation = match settings.moderation_level {
        ModerationLevel::Strict => "Stay strictly on topic and keep every contribution professional.",
        ModerationLevel::Moderate => "Stay on topic; brief tangents are fine when they help.",
        ModerationLevel::Relaxed => "Speculative and unconventional ideas are welcome.",
    };

    let mut prompt = format!(
        "You are {} in a brainstorming session with {} about \"{}\".",
        speaker.display_name(),
        partner,
        topic
    );
    if !description.trim().is_empty() {
        prompt.push_str(&format!(" Context from the organizer: {}", description.trim()));
    }
    prompt.push_str(&format!(
        " {} {} A human may interject; address their points first when they do. Keep each turn focused and under 300 words.",
        format, moderation
    ));
    prompt
}

/// The last `window` messages, oldest first, plus every attachment they carry.
pub fn compile(session: &Session, window: usize) -> (Vec<ContextMessage>, Vec<Attachment>) {
    let start = session.messages.len().saturating_sub(window);
    let recent = &session.messages[start..];

    let attachments = recent
        .iter()
        .flat_map(|m| m.attachments.iter().cloned())
        .collect();

    let context = recent
        .iter()
        .map(|m| ContextMessage {
            speaker: m.speaker,
            content: m.content.clone(),
            attachments: m.attachments.clone(),
        })
        .collect();

    (context, attachments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Participant, Participants};

    fn session_with(n: usize) -> Session {
        let participant = Participant {
            model: "m".into(),
            system_prompt: "p".into(),
        };
        let mut s = Session::new(
            "u".into(),
            "t".into(),
            String::new(),
            Participants {
                claude: participant.clone(),
                grok: participant,
            },
            SessionSettings::new(60, 10),
        );
        for i in 0..n {
            let speaker = if i % 2 == 0 { Speaker::Claude } else { Speaker::Grok };
            s.add_message(speaker, format!("msg {}", i), vec![], 1).unwrap();
        }
        s
    }

    #[test]
    fn context_keeps_the_most_recent_window() {
        let s = session_with(30);
        let (context, _) = compile(&s, 20);
        assert_eq!(context.len(), 20);
        assert_eq!(context.first().unwrap().content, "msg 10");
        assert_eq!(context.last().unwrap().content, "msg 29");

        let (short, _) = compile(&session_with(3), 20);
        assert_eq!(short.len(), 3);
    }

    #[test]
    fn prompt_reflects_format_and_partner() {
        let mut settings = SessionSettings::new(60, 10);
        settings.format = DiscussionFormat::Debate;
        let prompt = system_prompt(Speaker::Grok, "Fusion power", "", &settings);
        assert!(prompt.contains("You are Grok"));
        assert!(prompt.contains("challenge Claude"));
        assert!(prompt.contains("Fusion power"));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
