//! Envelope addresses and ESMTP parameters of MAIL and RCPT

use std::collections::BTreeSet;

use thiserror::Error;

use crate::suspect::Extension;

/// A MAIL or RCPT argument that can not be accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    /// The client asked for an extension we did not offer
    #[error("{0} not advertised")]
    NotAdvertised(Extension),
    /// A known parameter with a value we do not support
    #[error("unsupported value {value} for {keyword}")]
    InvalidValue {
        /// The parameter name
        keyword: String,
        /// What the client sent
        value: String,
    },
    /// No address or a malformed parameter
    #[error("syntax error")]
    Syntax,
}

impl ParameterError {
    /// The SMTP reply line for this error
    #[must_use]
    pub fn reply(&self) -> String {
        match self {
            ParameterError::Syntax => "501 5.5.2 Syntax error".to_string(),
            other => format!("555 5.5.4 {other}"),
        }
    }
}

/// Split the argument of `MAIL FROM:` or `RCPT TO:` into the bare address
/// and its ESMTP parameters.
///
/// The address is whatever is enclosed in angle brackets, or without those
/// the first word after the colon. `<>` is the null sender.
///
/// # Errors
/// If there is no address at all
pub fn extract_address(line: &str) -> Result<(String, Vec<String>), ParameterError> {
    let (address, params) = if let Some(open) = line.find('<') {
        let Some(close) = line[open..].find('>').map(|close| open + close) else {
            return Err(ParameterError::Syntax);
        };
        (line[open + 1..close].trim(), &line[close + 1..])
    } else {
        let after_colon = line
            .split_once(':')
            .map_or(line, |(_verb, rest)| rest)
            .trim_start();
        let address = after_colon.split_whitespace().next().unwrap_or_default();
        if address.is_empty() {
            return Err(ParameterError::Syntax);
        }
        (address, &after_colon[address.len()..])
    };

    Ok((
        address.to_string(),
        params.split_whitespace().map(ToString::to_string).collect(),
    ))
}

/// Check MAIL parameters against what EHLO advertised and collect the
/// extensions the client asked for.
///
/// Parameters we do not know are ignored.
///
/// # Errors
/// If an extension is requested that was not advertised or has an
/// unsupported value
pub fn parse_mail_parameters(
    params: &[String],
    advertised: &BTreeSet<Extension>,
) -> Result<BTreeSet<Extension>, ParameterError> {
    let mut requested = BTreeSet::new();
    for param in params {
        let (keyword, value) = match param.split_once('=') {
            Some((keyword, value)) => (keyword, Some(value)),
            None => (param.as_str(), None),
        };
        if keyword.is_empty() {
            return Err(ParameterError::Syntax);
        }

        let extension = if keyword.eq_ignore_ascii_case("SMTPUTF8") {
            Extension::SmtpUtf8
        } else if keyword.eq_ignore_ascii_case("BODY") {
            match value {
                Some(value) if value.eq_ignore_ascii_case("8BITMIME") => Extension::EightBitMime,
                Some(value) if value.eq_ignore_ascii_case("7BIT") => continue,
                _ => {
                    return Err(ParameterError::InvalidValue {
                        keyword: keyword.to_string(),
                        value: value.unwrap_or_default().to_string(),
                    })
                }
            }
        } else {
            continue;
        };

        if !advertised.contains(&extension) {
            return Err(ParameterError::NotAdvertised(extension));
        }
        requested.insert(extension);
    }
    Ok(requested)
}
