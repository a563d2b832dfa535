//! Observable containers the presentation layer reads from.

pub mod audio_list;
pub mod player_state;
pub mod store_status;

pub use audio_list::AudioListState;
pub use player_state::PlayerState;
pub use store_status::StoreStatus;

use crate::observable::Observable;

pub type AudioListStore = Observable<AudioListState>;
pub type PlayerStateStore = Observable<PlayerState>;
pub type StoreStatusStore = Observable<StoreStatus>;
