//! simplex-bots: moderation bots for SimpleX groups.
//!
//! Each configured module polls one group through the chat daemon and acts
//! on what it finds:
//! - Moderate: blacklist-driven blocking, message deletion and reports
//! - Quota: downgrades members who exceed message or spam quotas
//! - Promote: lifts observers to members after a waiting period

pub mod config;
pub mod moderate;
pub mod output;
pub mod promote;
pub mod quota;

#[cfg(test)]
mod testing;
