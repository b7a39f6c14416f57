/// Errors reported by the FAT engine.
///
/// `E` is the block-device error type. Structural and caller-misuse
/// failures leave the volume unmodified; device failures abort the
/// in-progress operation without retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError<E> {
    /// Block-device read, write, or sync failed.
    Device(E),
    NoFatPartition,
    InvalidBootSector,
    UnsupportedSectorSize(u16),
    UnsupportedSectorsPerCluster(u8),
    InvalidShortName,
    NotFound,
    NotDirectory,
    NotEmpty,
    AlreadyExists,
    NotOpen,
    ReadProhibited,
    WriteProhibited,
    SeekPastEnd,
    InvalidLength,
    InvalidPosition,
    /// Directory has no free slot and cannot grow, or would exceed the
    /// entry-count cap.
    DirFull,
    NoFreeCluster,
    /// Cluster index outside the valid range for this volume.
    BadCluster(u32),
    /// Chain ended or pointed at a free entry before the expected length.
    CorruptChain,
    /// Chain is longer than the volume's cluster count.
    ClusterChainTooLong,
    FileTooLarge,
    /// Directory entry was deleted by another handle.
    EntryDeleted,
    NotContiguous,
    InvalidTimestamp,
}
