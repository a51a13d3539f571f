use mailparse::{DispositionType, MailAddr, MailHeaderMap, MailParseError, ParsedMail};

/// Whatever was extracted from a message so far. Snapshotted into the
/// failure ledger when processing stops part way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialRecord {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub body: Option<String>,
}

/// One spreadsheet row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailRow {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub body: String,
}

impl From<&PartialRecord> for EmailRow {
    fn from(record: &PartialRecord) -> Self {
        let field = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            from: field(&record.from),
            to: field(&record.to),
            subject: field(&record.subject),
            date: field(&record.date),
            body: field(&record.body),
        }
    }
}

pub fn header_first(mail: &ParsedMail, name: &str) -> Option<String> {
    mail.headers
        .get_first_value(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Lower-cased address of the first mailbox in a `From` value, or the raw value.
pub fn sender_address(from: &str) -> String {
    let parsed = mailparse::addrparse(from).ok().and_then(|list| {
        list.iter().find_map(|addr| match addr {
            MailAddr::Single(info) => Some(info.addr.clone()),
            MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
        })
    });
    parsed.unwrap_or_else(|| from.trim().to_string()).to_lowercase()
}

/// Concatenated `text/plain` leaves, skipping attachments. `None` when there are none.
pub fn plain_text_body(mail: &ParsedMail) -> Result<Option<String>, MailParseError> {
    let mut parts = Vec::new();
    collect_plain_text(mail, &mut parts)?;
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.concat()))
    }
}

fn collect_plain_text(part: &ParsedMail, out: &mut Vec<String>) -> Result<(), MailParseError> {
    if matches!(
        part.get_content_disposition().disposition,
        DispositionType::Attachment
    ) {
        return Ok(());
    }

    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
            out.push(part.get_body()?);
        }
        return Ok(());
    }

    for sub in &part.subparts {
        collect_plain_text(sub, out)?;
    }
    Ok(())
}
