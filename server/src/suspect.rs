//! The normalized mail transaction handed to the scanner

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use mailgate_common::commands::bare_address;
use tempfile::TempPath;
use uuid::Uuid;

/// SMTP extensions a transaction may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum Extension {
    /// RFC 6531 internationalized addresses
    #[strum(serialize = "SMTPUTF8")]
    SmtpUtf8,
    /// RFC 6152 8bit message bodies
    #[strum(serialize = "8BITMIME")]
    EightBitMime,
}

/// Who handed us the message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// The HELO/EHLO name
    pub helo: String,
    /// The client IP (or socket path)
    pub address: String,
    /// Reverse DNS name of the client as far as known
    pub reverse_dns: String,
    /// The client port on IP connections
    pub port: Option<u16>,
}

/// What a protocol session collected for one message
#[derive(Debug)]
pub struct Transaction {
    /// Envelope sender without angle brackets, empty for the null sender
    pub from: String,
    /// Envelope recipients in the order received, byte for byte as the
    /// client sent them (milter recipients keep their angle brackets)
    pub recipients: Vec<Vec<u8>>,
    /// The spooled message (headers, empty line, body)
    pub spool: TempPath,
    /// Extensions the client used for this message
    pub extensions: BTreeSet<Extension>,
    /// The connection this message came in on
    pub client: ClientInfo,
    /// Milter macros, empty for SMTP
    pub macros: HashMap<String, String>,
}

/// One message under examination.
///
/// Scanners may change the envelope, tag the message or queue header
/// changes; the handler commits those changes after an accepting verdict.
/// The spool file is removed when the suspect is dropped.
#[derive(Debug)]
pub struct Suspect {
    id: Uuid,
    /// Envelope sender, may be changed by scanners
    pub from: String,
    /// Envelope recipients, may be changed by scanners
    pub recipients: Vec<String>,
    original_from: String,
    original_recipients: Vec<Vec<u8>>,
    spool: TempPath,
    tags: HashMap<String, String>,
    added_headers: Vec<(String, String)>,
    changed_headers: Vec<(String, String)>,
    extensions: BTreeSet<Extension>,
    client: ClientInfo,
    macros: HashMap<String, String>,
    body_replaced: bool,
}

impl Suspect {
    /// Take ownership of a completed transaction
    #[must_use]
    pub fn new(transaction: Transaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: transaction.from.clone(),
            recipients: transaction
                .recipients
                .iter()
                .map(|raw| bare_address(raw))
                .collect(),
            original_from: transaction.from,
            original_recipients: transaction.recipients,
            spool: transaction.spool,
            tags: HashMap::new(),
            added_headers: Vec::new(),
            changed_headers: Vec::new(),
            extensions: transaction.extensions,
            client: transaction.client,
            macros: transaction.macros,
            body_replaced: false,
        }
    }

    /// Unique id, used to correlate log lines
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The spooled message
    #[must_use]
    pub fn spool_path(&self) -> &Path {
        &self.spool
    }

    /// The sender as received
    #[must_use]
    pub fn original_from(&self) -> &str {
        &self.original_from
    }

    /// The recipients exactly as received
    #[must_use]
    pub fn original_recipients(&self) -> &[Vec<u8>] {
        &self.original_recipients
    }

    /// The received bytes of `recipient` if it is one of the originals
    #[must_use]
    pub fn received_as(&self, recipient: &str) -> Option<&[u8]> {
        self.original_recipients
            .iter()
            .find(|raw| bare_address(raw) == recipient)
            .map(Vec::as_slice)
    }

    /// Whether a scanner replaced the sender
    #[must_use]
    pub fn from_changed(&self) -> bool {
        self.from != self.original_from
    }

    /// Whether a scanner touched the recipient list
    #[must_use]
    pub fn recipients_changed(&self) -> bool {
        self.recipients.len() != self.original_recipients.len()
            || self
                .recipients
                .iter()
                .zip(&self.original_recipients)
                .any(|(recipient, raw)| *recipient != bare_address(raw))
    }

    /// Queue a header to be added on commit
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.added_headers.push((name.to_string(), value.to_string()));
    }

    /// Queue a change of the first header called `name`; an empty value
    /// removes it
    pub fn change_header(&mut self, name: &str, value: &str) {
        self.changed_headers.push((name.to_string(), value.to_string()));
    }

    /// Headers queued for adding
    #[must_use]
    pub fn added_headers(&self) -> &[(String, String)] {
        &self.added_headers
    }

    /// Headers queued for changing
    #[must_use]
    pub fn changed_headers(&self) -> &[(String, String)] {
        &self.changed_headers
    }

    /// Set a tag, replacing an earlier value
    pub fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    /// Look up a tag
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// All tags
    #[must_use]
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Extensions the client used
    #[must_use]
    pub fn extensions(&self) -> &BTreeSet<Extension> {
        &self.extensions
    }

    /// The connection the message came in on
    #[must_use]
    pub fn client(&self) -> &ClientInfo {
        &self.client
    }

    /// A milter macro, e.g. the queue id `i`
    #[must_use]
    pub fn macro_value(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    /// Record that the spooled body was rewritten and has to be sent back
    pub fn mark_body_replaced(&mut self) {
        self.body_replaced = true;
    }

    /// Whether the spooled body was rewritten
    #[must_use]
    pub fn body_replaced(&self) -> bool {
        self.body_replaced
    }
}
