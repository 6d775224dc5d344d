//! Media Server API Contract
//!
//! Abstracts one remote media-server dialect (Ampache, Subsonic, ...). Every
//! dialect exposes the same capability-gated surface; features a dialect
//! lacks are reported through [`LibraryServerApi::supports`] instead of
//! failing at call time.

use async_trait::async_trait;

use crate::error::Result;
use crate::library::{
    EntityKind, LibraryMetadata, PageRequest, RecordStream, RemotePlaylist,
};

/// Remote media-server operations consumed by the sync engine.
///
/// Implementations own transport, authentication and decoding. Transport
/// retries belong here as well; the engine never retries a failed call.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::server::LibraryServerApi;
/// use bridge_traits::library::{EntityKind, PageRequest};
/// use futures::StreamExt;
///
/// async fn first_artists(api: &dyn LibraryServerApi) -> bridge_traits::error::Result<()> {
///     let mut stream = api.fetch_page(PageRequest::page(EntityKind::Artist, 0, 50)).await?;
///     while let Some(record) = stream.next().await {
///         println!("{:?}", record?.id);
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait LibraryServerApi: Send + Sync {
    /// Short dialect name used in logs (e.g. "ampache").
    fn dialect(&self) -> &str;

    /// Whether the dialect can list entities of `kind` at all.
    fn supports(&self, kind: EntityKind) -> bool;

    /// Handshake call returning per-class counts and change dates.
    async fn fetch_library_metadata(&self) -> Result<LibraryMetadata>;

    /// Fetch one page (or a whole scope) of records.
    async fn fetch_page(&self, request: PageRequest) -> Result<RecordStream>;

    /// Full-text search for entities of `kind`.
    async fn search(&self, kind: EntityKind, text: &str) -> Result<RecordStream>;

    /// Look up a playlist header; `Ok(None)` when the server does not know it.
    async fn fetch_playlist(&self, playlist_id: &str) -> Result<Option<RemotePlaylist>>;

    /// Ordered playable entries of a playlist.
    async fn fetch_playlist_entries(&self, playlist_id: &str) -> Result<RecordStream>;

    async fn create_playlist(&self, name: &str) -> Result<RemotePlaylist>;

    async fn add_song_to_playlist(&self, playlist_id: &str, song_id: &str) -> Result<()>;

    async fn remove_playlist_item(&self, playlist_id: &str, index: usize) -> Result<()>;

    /// Replace the remote order with `song_ids` as given.
    async fn reorder_playlist(&self, playlist_id: &str, song_ids: &[String]) -> Result<()>;

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()>;
}
