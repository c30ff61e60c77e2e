//! Raw reply composition with lettre's message builder.

use lettre::message::Mailbox;
use lettre::{Address, Message};
use lettre::message::header::ContentType;

use crate::error::MailboxError;

/// Fields of an outgoing reply.
#[derive(Debug, Clone)]
pub struct ReplyDraft<'a> {
    pub from: &'a str,
    pub to: &'a str,
    /// Subject of the message being answered (without `Re: `).
    pub original_subject: &'a str,
    /// Message-Id of the message being answered; empty when unknown.
    pub in_reply_to: &'a str,
    pub body: &'a str,
}

pub fn reply_subject(original: &str) -> String {
    format!("Re: {original}")
}

/// Build the RFC 5322 bytes of a threaded plain-text reply.
pub fn compose_reply(draft: &ReplyDraft<'_>) -> Result<Vec<u8>, MailboxError> {
    let from = parse_mailbox(draft.from)
        .map_err(|e| MailboxError::Compose(format!("Invalid from address {:?}: {e}", draft.from)))?;
    let to = parse_mailbox(draft.to)
        .map_err(|e| MailboxError::Compose(format!("Invalid to address {:?}: {e}", draft.to)))?;

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(reply_subject(draft.original_subject));

    let in_reply_to = draft.in_reply_to.trim();
    if !in_reply_to.is_empty() {
        builder = builder
            .in_reply_to(in_reply_to.to_string())
            .references(in_reply_to.to_string());
    }

    let message = builder
        .header(ContentType::TEXT_PLAIN)
        .body(draft.body.to_string())
        .map_err(|e| MailboxError::Compose(e.to_string()))?;

    Ok(message.formatted())
}

/// Parse a header address, tolerating RFC 5322 comments such as
/// `John Doe (Acme) <john@example.com>` or `john@example.com (John)`.
fn parse_mailbox(raw: &str) -> Result<Mailbox, String> {
    let strict_err = match raw.parse::<Mailbox>() {
        Ok(mailbox) => return Ok(mailbox),
        Err(e) => e.to_string(),
    };

    let cleaned = strip_comments(raw);
    if let Ok(mailbox) = cleaned.parse::<Mailbox>() {
        return Ok(mailbox);
    }

    // Last resort: keep only the address and drop the display name.
    let addr_spec = match (cleaned.rfind('<'), cleaned.rfind('>')) {
        (Some(open), Some(close)) if open < close => cleaned[open + 1..close].trim(),
        _ => cleaned
            .split_whitespace()
            .find(|token| token.contains('@'))
            .unwrap_or(cleaned.as_str()),
    };
    addr_spec
        .parse::<Address>()
        .map(|address| Mailbox::new(None, address))
        .map_err(|_| strict_err)
}

/// Remove parenthesised comments outside quoted strings and collapse
/// whitespace.
fn strip_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    let mut quoted = false;
    let mut escaped = false;

    for c in raw.chars() {
        if escaped {
            escaped = false;
            if depth == 0 {
                out.push(c);
            }
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                if depth == 0 {
                    out.push(c);
                }
            }
            '"' if depth == 0 => {
                quoted = !quoted;
                out.push(c);
            }
            '(' if !quoted => depth += 1,
            ')' if !quoted && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    out.push(' ');
                }
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
