use bitflags::bitflags;

bitflags! {
    /// Flags of a track header (`tkhd`) box.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TkhdFlags: u32 {
        /// The track is enabled.
        const ENABLED = 0x00_0001;
        /// The track is used in the presentation.
        const IN_MOVIE = 0x00_0002;
        /// The track is used when previewing the presentation.
        const IN_PREVIEW = 0x00_0004;
    }

    /// Flags of a track fragment header (`tfhd`) box.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TfhdFlags: u32 {
        /// `base_data_offset` is present.
        const BASE_DATA_OFFSET_PRESENT = 0x00_0001;
        /// `sample_description_index` is present.
        const SAMPLE_DESCRIPTION_INDEX_PRESENT = 0x00_0002;
        /// `default_sample_duration` is present.
        const DEFAULT_SAMPLE_DURATION_PRESENT = 0x00_0008;
        /// `default_sample_size` is present.
        const DEFAULT_SAMPLE_SIZE_PRESENT = 0x00_0010;
        /// `default_sample_flags` is present.
        const DEFAULT_SAMPLE_FLAGS_PRESENT = 0x00_0020;
        /// The fragment has no samples.
        const DURATION_IS_EMPTY = 0x01_0000;
        /// Data offsets in the track fragment are relative to the start of the enclosing `moof`.
        const DEFAULT_BASE_IS_MOOF = 0x02_0000;
    }

    /// Flags of a track fragment run (`trun`) box, declaring which per-sample fields are present.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TrunFlags: u32 {
        /// `data_offset` is present.
        const DATA_OFFSET_PRESENT = 0x00_0001;
        /// `first_sample_flags` is present.
        const FIRST_SAMPLE_FLAGS_PRESENT = 0x00_0004;
        /// Each sample has a `sample_duration`.
        const SAMPLE_DURATION_PRESENT = 0x00_0100;
        /// Each sample has a `sample_size`.
        const SAMPLE_SIZE_PRESENT = 0x00_0200;
        /// Each sample has `sample_flags`.
        const SAMPLE_FLAGS_PRESENT = 0x00_0400;
        /// Each sample has a `sample_composition_time_offset`.
        const SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT = 0x00_0800;
    }
}

/// The `sample_flags` of a sample in a track fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleFlags(pub u32);

impl SampleFlags {
    /// A sync sample: `sample_depends_on = 2`, i.e. it does not depend on other samples.
    pub const SYNC: Self = Self(0x0200_0000);

    /// A non-sync sample: `sample_depends_on = 1` and `sample_is_non_sync_sample` set.
    pub const NON_SYNC: Self = Self(0x0101_0000);

    /// Return the flags for a sample which is a keyframe if `is_keyframe`.
    pub const fn for_keyframe(is_keyframe: bool) -> Self {
        if is_keyframe {
            Self::SYNC
        } else {
            Self::NON_SYNC
        }
    }

    /// Return whether these flags mark a sync sample.
    pub const fn is_sync(self) -> bool {
        self.0 & 0x0001_0000 == 0
    }
}
