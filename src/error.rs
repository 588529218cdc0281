use crate::routing::SubscribeError;
use crate::topic::TopicTrieError;

/// Errors that can occur anywhere in the crate
#[derive(Debug)]
pub enum Error {
	/// Route indexing and dispatch errors
	Topic(TopicTrieError),
	/// Subscription orchestration errors
	Subscribe(SubscribeError),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			| Error::Topic(e) => write!(f, "Topic error: {}", e),
			| Error::Subscribe(e) => write!(f, "Subscribe error: {}", e),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			| Error::Topic(e) => Some(e),
			| Error::Subscribe(e) => Some(e),
		}
	}
}

impl From<TopicTrieError> for Error {
	fn from(err: TopicTrieError) -> Self {
		Error::Topic(err)
	}
}

impl From<SubscribeError> for Error {
	fn from(err: SubscribeError) -> Self {
		Error::Subscribe(err)
	}
}
