//! FinderNate REST collaborators used by the call core

pub mod calls;
pub mod client;
pub mod media;

use anyhow::Result;

pub use calls::{AcceptedCall, ActiveCall, SignalingBackend};
pub use client::ApiClient;
pub use media::{CachedCredentials, CredentialSource, MediaRooms, RoomInfo, RoomRequest};

/// Print the call the backend still considers active for us.
pub async fn show_active_call(client: &ApiClient) -> Result<()> {
    match client.get_active_call().await? {
        Some(call) => println!(
            "Active call {} (chat {}, {}, status {})",
            call.call_id,
            call.chat_id.as_deref().unwrap_or("?"),
            call.call_type.map(|t| t.as_str()).unwrap_or("?"),
            call.status.as_deref().unwrap_or("?"),
        ),
        None => println!("No active call."),
    }
    Ok(())
}
