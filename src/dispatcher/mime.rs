use lettre::message::header::ContentType as MimeContentType;
use lettre::message::Mailbox;
use lettre::message::MultiPart;
use lettre::message::SinglePart;
use lettre::Message;

use crate::attachments::ResolvedAttachment;
use crate::domain::ContentType;
use crate::domain::Payload;

#[derive(Debug, thiserror::Error)]
pub enum MimeError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
}

/// Builds a `lettre::Message` from a submitted payload plus pre-resolved
/// attachment bytes (spec.md §4.5 step 3): From/To/Cc/Bcc/Reply-To/
/// Return-Path/Subject/custom headers, a single text part (`plain` or
/// `html`), and one `SinglePart::attachment` per resolved attachment.
pub fn build_message(
    payload: &Payload,
    attachments: &[ResolvedAttachment],
) -> Result<Message, MimeError> {
    let mut builder = Message::builder().from(payload.from.parse::<Mailbox>()?);

    for addr in &payload.to {
        builder = builder.to(addr.parse::<Mailbox>()?);
    }
    for addr in &payload.cc {
        builder = builder.cc(addr.parse::<Mailbox>()?);
    }
    for addr in &payload.bcc {
        builder = builder.bcc(addr.parse::<Mailbox>()?);
    }
    if let Some(reply_to) = &payload.reply_to {
        builder = builder.reply_to(reply_to.parse::<Mailbox>()?);
    }
    if let Some(return_path) = &payload.return_path {
        builder = builder.header(lettre::message::header::Header::new_raw(
            format!("Return-Path: {return_path}"),
        ));
    }
    builder = builder.subject(payload.subject.clone());

    for (name, value) in &payload.headers {
        builder = builder.header(lettre::message::header::Header::new_raw(format!(
            "{name}: {value}"
        )));
    }

    let body_part = match payload.content_type {
        ContentType::Plain => SinglePart::plain(payload.body.clone()),
        ContentType::Html => SinglePart::html(payload.body.clone()),
    };

    if attachments.is_empty() {
        return Ok(builder.singlepart(body_part)?);
    }

    let mut multipart = MultiPart::mixed().singlepart(body_part);
    for attachment in attachments {
        let content_type = attachment
            .mime_type
            .as_deref()
            .and_then(|m| m.parse::<MimeContentType>().ok())
            .unwrap_or_else(|| guess_mime_type(&attachment.filename));
        multipart = multipart.singlepart(
            SinglePart::builder()
                .header(content_type)
                .header(lettre::message::header::ContentDisposition::attachment(
                    &attachment.filename,
                ))
                .body(attachment.bytes.clone()),
        );
    }

    Ok(builder.multipart(multipart)?)
}

fn guess_mime_type(filename: &str) -> MimeContentType {
    let guess = mime_guess_from_extension(filename);
    guess
        .parse::<MimeContentType>()
        .unwrap_or_else(|_| MimeContentType::parse("application/octet-stream").unwrap())
}

fn mime_guess_from_extension(filename: &str) -> &'static str {
    match filename.rsplit('.').next().unwrap_or("").to_lowercase().as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "zip" => "application/zip",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn payload() -> Payload {
        Payload {
            from: "sender@example.com".into(),
            to: vec!["dest@example.com".into()],
            cc: vec![],
            bcc: vec![],
            subject: "hi".into(),
            body: "hello".into(),
            content_type: ContentType::Plain,
            headers: HashMap::new(),
            attachments: vec![],
            return_path: None,
            reply_to: None,
            retry_count: 0,
        }
    }

    #[test]
    fn builds_plain_message_without_attachments() {
        let message = build_message(&payload(), &[]).unwrap();
        assert!(!message.formatted().is_empty());
    }

    #[test]
    fn builds_message_with_attachment() {
        let resolved = vec![ResolvedAttachment {
            filename: "report.csv".into(),
            bytes: b"a,b,c".to_vec(),
            mime_type: None,
        }];
        let message = build_message(&payload(), &resolved).unwrap();
        assert!(!message.formatted().is_empty());
    }

    #[test]
    fn guesses_mime_from_extension() {
        assert_eq!(mime_guess_from_extension("a.PDF"), "application/pdf");
        assert_eq!(mime_guess_from_extension("unknown"), "application/octet-stream");
    }
}
