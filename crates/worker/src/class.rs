/// Shared execution classes used for worker scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// First enumeration of a tree position after it becomes visible.
	Populate,
	/// Recomputation requested by a factory after the position was populated.
	Refresh,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Populate => "populate",
			Self::Refresh => "refresh",
		}
	}
}
