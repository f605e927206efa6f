//! Modifications sent between end of body and the verdict

use futures::{AsyncRead, AsyncWrite};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use mailgate_common::{
    encoding::ServerMessage,
    modifications::{
        body::ReplaceBody,
        headers::{AddHeader, ChangeHeader},
        recipients::{AddRecipient, DeleteRecipient},
        sender::ChangeFrom,
        ModificationAction,
    },
    optneg::Side,
};

use super::{Error, MilterSession, State};
use crate::suspect::Suspect;

impl<RW: AsyncRead + AsyncWrite + Unpin + Send> MilterSession<RW> {
    /// Add a header at the end of the header block
    ///
    /// # Errors
    /// If no message is complete or writing failed
    pub async fn add_header(&mut self, name: &str, value: &str) -> Result<bool, Error> {
        self.modify(AddHeader::new(name, value).into()).await
    }

    /// Change the `index`th (1-based) header called `name`, an empty value
    /// deletes it
    ///
    /// # Errors
    /// If no message is complete or writing failed
    pub async fn change_header(
        &mut self,
        index: u32,
        name: &str,
        value: &str,
    ) -> Result<bool, Error> {
        self.modify(ChangeHeader::new(index, name, value).into()).await
    }

    /// Replace the envelope sender
    ///
    /// # Errors
    /// If no message is complete or writing failed
    pub async fn change_from(&mut self, sender: &str) -> Result<bool, Error> {
        self.modify(ChangeFrom::new(&format!("<{sender}>"), None).into()).await
    }

    /// Add an envelope recipient
    ///
    /// # Errors
    /// If no message is complete or writing failed
    pub async fn add_recipient(&mut self, recipient: &str) -> Result<bool, Error> {
        self.modify(AddRecipient::new(format!("<{recipient}>").as_bytes()).into()).await
    }

    /// Remove an envelope recipient, `received` has to be the bytes the
    /// MTA sent in its recipient report
    ///
    /// # Errors
    /// If no message is complete or writing failed
    pub async fn delete_recipient(&mut self, received: &[u8]) -> Result<bool, Error> {
        self.modify(DeleteRecipient::new(received).into()).await
    }

    /// Replace the whole body with what `body` yields, streamed in frames
    /// the MTA accepts.
    ///
    /// # Errors
    /// If no message is complete, reading `body` or writing failed
    pub async fn replace_body<R>(&mut self, mut body: R) -> Result<bool, Error>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
    {
        let probe: ModificationAction = ReplaceBody::new(&[]).into();
        if !self.modification_allowed(&probe)? {
            return Ok(false);
        }

        let chunk_size = ReplaceBody::MAX_CHUNK.min(self.max_frame_size - 1);
        let mut chunk = vec![0_u8; chunk_size];
        let mut sent_any = false;
        loop {
            let read = body.read(&mut chunk).await?;
            if read == 0 && sent_any {
                break;
            }
            let action: ModificationAction = ReplaceBody::new(&chunk[..read]).into();
            self.send(ServerMessage::ModificationAction(action)).await?;
            sent_any = true;
            if read == 0 {
                break;
            }
        }
        Ok(true)
    }

    /// Send the envelope changes a scanner made to `suspect`.
    ///
    /// Recipients are never diffed: if anything changed, every original
    /// recipient is removed and every current one added. Recipients the
    /// MTA reported go out with the bytes it sent.
    ///
    /// # Errors
    /// If no message is complete or writing failed
    pub async fn commit_envelope(&mut self, suspect: &Suspect) -> Result<(), Error> {
        if suspect.from_changed() {
            self.change_from(&suspect.from).await?;
        }
        if suspect.recipients_changed() {
            for recipient in suspect.original_recipients() {
                self.delete_recipient(recipient).await?;
            }
            for recipient in &suspect.recipients {
                match suspect.received_as(recipient) {
                    Some(received) => {
                        self.modify(AddRecipient::new(received).into()).await?;
                    }
                    None => {
                        self.add_recipient(recipient).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn modify(&mut self, action: ModificationAction) -> Result<bool, Error> {
        if !self.modification_allowed(&action)? {
            return Ok(false);
        }
        debug!("Sending modification {action}");
        self.send(ServerMessage::ModificationAction(action)).await?;
        Ok(true)
    }

    fn modification_allowed(&self, action: &ModificationAction) -> Result<bool, Error> {
        if self.state != State::Complete {
            return Err(Error::InvalidState {
                operation: "sending a modification",
                state: self.state,
            });
        }
        if self
            .capabilities
            .allows(action.required_capability(), Side::Both)
        {
            Ok(true)
        } else {
            warn!(
                "Skipping {action}, {:?} was not negotiated",
                action.required_capability()
            );
            Ok(false)
        }
    }
}
