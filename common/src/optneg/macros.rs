use std::ops::{Index, IndexMut};

use bytes::{BufMut, BytesMut};
use itertools::Itertools;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use mailgate_utils::ByteParsing;

const MACRO_STAGE_COUNT: usize = 7;

/// Macros a filter requests per stage
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MacroStages {
    stages: [Vec<String>; MACRO_STAGE_COUNT],
}

impl Index<MacroStage> for MacroStages {
    type Output = Vec<String>;

    fn index(&self, index: MacroStage) -> &Self::Output {
        &self.stages[index as usize]
    }
}

impl IndexMut<MacroStage> for MacroStages {
    fn index_mut(&mut self, index: MacroStage) -> &mut Self::Output {
        &mut self.stages[index as usize]
    }
}

impl MacroStages {
    /// Request `macros` for the `stage` provided.
    pub fn with_stage<S: ToString>(&mut self, stage: MacroStage, macros: &[S]) {
        self[stage].extend(macros.iter().map(ToString::to_string));
    }

    /// Whether no macros are requested at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(Vec::is_empty)
    }

    // <4-byte stage id><space separated symbols>\0 per non-empty stage.
    pub(crate) fn write(&self, buffer: &mut BytesMut) {
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.is_empty() {
                continue;
            }
            buffer.put_u32(index as u32);
            buffer.put_slice(stage.iter().join(" ").as_bytes());
            buffer.put_u8(0);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.stages
            .iter()
            .filter(|stage| !stage.is_empty())
            .map(|stage| {
                // One separator per symbol, the last one is the null byte
                MacroStage::CODE_SIZE + stage.iter().map(|s| s.len() + 1).sum::<usize>()
            })
            .sum()
    }

    /// Parse the macro request trailing an option negotiation.
    ///
    /// Unknown stages and malformed trailers are ignored.
    pub(crate) fn parse(mut buffer: BytesMut) -> Self {
        let mut stages = Self::default();
        while let Some(id) = buffer.safe_get_u32() {
            let Some(symbols) = buffer.delimited(0) else {
                break;
            };
            let Ok(stage) = MacroStage::try_from(id) else {
                continue;
            };
            stages[stage].extend(
                String::from_utf8_lossy(&symbols)
                    .split_whitespace()
                    .map(ToString::to_string),
            );
        }
        stages
    }
}

/// A macro stage index into [`MacroStages`]
#[derive(Debug, Copy, Clone, IntoPrimitive, TryFromPrimitive, PartialEq, Eq)]
#[repr(u32)]
pub enum MacroStage {
    /// `SMFIM_CONNECT`
    Connect = 0,
    /// `SMFIM_HELO`
    Helo = 1,
    /// `SMFIM_ENVFROM`
    MailFrom = 2,
    /// `SMFIM_ENVRCPT`
    RcptTo = 3,
    /// `SMFIM_DATA`
    Data = 4,
    /// `SMFIM_EOM`
    EndOfBody = 5,
    /// `SMFIM_EOH`
    EndOfHeaders = 6,
}

impl MacroStage {
    const CODE_SIZE: usize = 4;
}
