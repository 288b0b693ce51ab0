//! Facade crate for the Orc protocol engine.
//!
//! Re-exports the OP codec (`core`) and the client runtime (`engine`) so
//! applications depend on a single crate. The types most callers need are
//! also available at the root:
//!
//! ```no_run
//! # async fn demo() -> orc::Result<()> {
//! let cfg = orc::engine::config::load_from_file("orc.yaml")?;
//! let client = orc::OrcClient::connect(cfg, orc::TreeCodec::new()).await?;
//! let request = orc::decode("{message_type=PRICE_FEED|instrument_id={underlying=AUDUSD}}")?;
//! client
//!     .send(request, orc::CorrelationId::new_v4(), |d| println!("{:?}", d.payload))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod core {
    pub use orc_core::*;
}

pub mod engine {
    pub use orc_engine::*;
}

pub use orc_core::protocol::{decode, encode, CorrelationId, Document, MessageType, Node};
pub use orc_core::{OrcError, Result};
pub use orc_engine::registry::{Delivery, SubscriptionHandle};
pub use orc_engine::{BusinessCodec, OrcClient, TreeCodec};
