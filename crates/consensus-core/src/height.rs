use bincode::{Decode, Encode};
use convi::CastFrom as _;
use vbft_util_array_type::array_type_fixed_size_define;

array_type_fixed_size_define! {
    /// Block height
    ///
    /// Genesis is at height `0`. Fixed-size encoded, so it sorts correctly
    /// as a database key and has a constant size on the wire.
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Height(u64);
}

array_type_fixed_size_define! {
    /// A numbered attempt at reaching agreement for a given [`Height`]
    ///
    /// Starts at `0` for every height and is bumped on each view change.
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct View(u32);
}

impl View {
    pub fn as_usize(self) -> usize {
        usize::cast_from(self.to_number())
    }
}
