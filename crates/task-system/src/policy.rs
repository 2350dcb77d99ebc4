use std::fmt;

use super::task::TaskId;

/// What to do when a request arrives while work with the same key is already in its lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
	/// Drop the new request if work with the same key is queued or running.
	Keep,
	/// Supersede a queued request with the same key in place. Running work is left alone and
	/// the new request waits behind it.
	Replace,
}

/// Execution constraints carried alongside a request.
///
/// The task system doesn't interpret them, they are only stored and reported back through
/// [`WorkInfo`], so an embedder with a platform scheduler can honor them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraints {
	pub requires_battery_not_low: bool,
	pub requires_charging: bool,
	pub requires_device_idle: bool,
}

/// Describes how a task should be placed in the system: which lane runs it, the key used for
/// deduplication, tags used for bulk cancellation and the policy applied on key collisions.
#[derive(Debug, Clone)]
pub struct WorkRequest {
	pub(crate) lane: String,
	pub(crate) key: String,
	pub(crate) tags: Vec<String>,
	pub(crate) constraints: Constraints,
	pub(crate) policy: ExistingWorkPolicy,
}

impl WorkRequest {
	/// Creates a request with the [`ExistingWorkPolicy::Keep`] policy, no tags and no constraints.
	#[must_use]
	pub fn new(lane: impl Into<String>, key: impl Into<String>) -> Self {
		Self {
			lane: lane.into(),
			key: key.into(),
			tags: Vec::new(),
			constraints: Constraints::default(),
			policy: ExistingWorkPolicy::Keep,
		}
	}

	#[must_use]
	pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
		self.tags.push(tag.into());
		self
	}

	#[must_use]
	pub const fn with_policy(mut self, policy: ExistingWorkPolicy) -> Self {
		self.policy = policy;
		self
	}

	#[must_use]
	pub const fn with_constraints(mut self, constraints: Constraints) -> Self {
		self.constraints = constraints;
		self
	}

	#[must_use]
	pub fn lane(&self) -> &str {
		&self.lane
	}

	#[must_use]
	pub fn key(&self) -> &str {
		&self.key
	}

	pub(crate) fn has_tag(&self, tag: &str) -> bool {
		self.tags.iter().any(|t| t == tag)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
	Queued,
	Running,
}

impl fmt::Display for WorkState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Queued => write!(f, "queued"),
			Self::Running => write!(f, "running"),
		}
	}
}

/// Snapshot of a piece of work currently known by the system.
#[derive(Debug, Clone)]
pub struct WorkInfo {
	pub task_id: TaskId,
	pub lane: String,
	pub key: String,
	pub tags: Vec<String>,
	pub constraints: Constraints,
	pub state: WorkState,
}

impl WorkInfo {
	pub(crate) fn from_request(task_id: TaskId, request: &WorkRequest, state: WorkState) -> Self {
		Self {
			task_id,
			lane: request.lane.clone(),
			key: request.key.clone(),
			tags: request.tags.clone(),
			constraints: request.constraints,
			state,
		}
	}
}
