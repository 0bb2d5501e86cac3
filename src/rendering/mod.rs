pub mod debug;
pub mod fragment_lists;
pub mod illustration;
pub mod resources;

pub use debug::{fmt_fragment_lists, fmt_illustration_buffers, FragmentListDump, IllustrationDump};
pub use fragment_lists::{
    pack_color10, unpack_color10, FragmentListRenderer, FragmentRecord, CAPTURE_SHADER_LIB,
    INVALID_INDEX, MAX_PIXEL_FRAGMENTS,
};
pub use illustration::IllustrationBuffers;
pub use resources::{CapacityTracker, PingPong, StorageArray, INITIAL_FRAGMENT_CAPACITY};
