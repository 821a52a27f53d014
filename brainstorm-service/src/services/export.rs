//! Transcript export. Allowed in every session status.

use serde::Deserialize;
use std::fmt::Write as _;

use crate::error::BrainstormError;
use crate::models::Session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Markdown,
}

pub struct Transcript {
    pub content_type: &'static str,
    pub file_name: String,
    pub body: String,
}

pub fn export(session: &Session, format: ExportFormat) -> Result<Transcript, BrainstormError> {
    match format {
        ExportFormat::Json => {
            let body = serde_json::to_string_pretty(&crate::dtos::SessionResponse::from(
                session.clone(),
            ))
            .map_err(|e| BrainstormError::Store(anyhow::anyhow!(e)))?;
            Ok(Transcript {
                content_type: "application/json",
                file_name: format!("brainstorm-{}.json", session.id),
                body,
            })
        }
        ExportFormat::Markdown => Ok(Transcript {
            content_type: "text/markdown; charset=utf-8",
            file_name: format!("brainstorm-{}.md", session.id),
            body: markdown(session),
        }),
    }
}

fn markdown(session: &Session) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", session.topic);
    let _ = writeln!(out);
    if !session.description.trim().is_empty() {
        let _ = writeln!(out, "{}", session.description.trim());
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "- **Status:** {}", session.status);
    let _ = writeln!(
        out,
        "- **Participants:** Claude (`{}`), Grok (`{}`)",
        session.participants.claude.model, session.participants.grok.model
    );
    let _ = writeln!(
        out,
        "- **Turns:** {} / {}",
        session.current_turn(),
        session.settings.max_turns
    );
    let _ = writeln!(out, "- **Total tokens:** {}", session.total_tokens);
    let _ = writeln!(out, "- **Started:** {}", session.created_at.to_rfc3339());
    if let Some(completed_at) = session.completed_at {
        let _ = writeln!(out, "- **Completed:** {}", completed_at.to_rfc3339());
    }
    if let Some(error) = &session.error {
        let _ = writeln!(out, "- **Error:** {}", error);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "---");

    for message in &session.messages {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "### {} ({})",
            message.speaker.display_name(),
            message.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out);
        if !message.content.is_empty() {
            let _ = writeln!(out, "{}", message.content);
        }
        for attachment in &message.attachments {
            let _ = writeln!(out, "- Attachment: [{}]({})", attachment.name, attachment.url);
        }
    }

    out
}
