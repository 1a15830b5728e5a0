mod barrier;
mod channels;
mod claims;

pub use barrier::{BarrierWait, ReadyBarrier};
pub use channels::{
    completion_channel, CompletionReceiver, CompletionRecord, CompletionSender, Outcome,
    ResultReceiver, ResultRouter, WinnerSet,
};
pub use claims::AgencyClaims;
