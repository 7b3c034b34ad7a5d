use super::ConnectionState;
use tracing::debug;

/// Event driving a [`FeedStateMachine`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FeedInput {
    Start,
    /// Live connection opened successfully.
    Opened,
    /// Connection attempt (or bootstrap fetch) failed or timed out.
    Failed,
    /// Established live connection closed or errored.
    Disconnected,
    /// Reconnect backoff delay elapsed.
    BackoffElapsed,
}

/// [`ConnectionState`] transitions with retry accounting for a running feed.
///
/// Stopping is not an input: [`LiveFeedController::stop`](super::LiveFeedController::stop)
/// drops the worker owning the machine and publishes `Disconnected` itself.
///
/// ```text
/// Disconnected --Start--> Connecting --Opened--> Live --Disconnected--> Error
///                         Connecting --Failed--> Error
/// Error --BackoffElapsed--> Connecting (retries <= max) | Polling (retries > max)
/// Polling --Opened--> Live          Polling --Failed--> Polling
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FeedStateMachine {
    state: ConnectionState,
    retries: u32,
    max_retries: u32,
}

impl FeedStateMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retries: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failures since the last successful open.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether the next backoff expiry falls back to polling.
    pub fn exhausted(&self) -> bool {
        self.retries > self.max_retries
    }

    /// Apply an input, returning the new state if it changed.
    pub fn apply(&mut self, input: FeedInput) -> Option<ConnectionState> {
        use ConnectionState::*;

        let next = match (self.state, input) {
            (Disconnected, FeedInput::Start) => Connecting,
            (Connecting | Polling, FeedInput::Opened) => {
                self.retries = 0;
                Live
            }
            (Connecting, FeedInput::Failed) | (Live, FeedInput::Disconnected) => {
                self.retries = self.retries.saturating_add(1);
                Error
            }
            (Error, FeedInput::BackoffElapsed) if self.exhausted() => Polling,
            (Error, FeedInput::BackoffElapsed) => Connecting,
            (state, input) => {
                debug!(%state, ?input, "FeedStateMachine ignoring input");
                state
            }
        };

        if next == self.state {
            None
        } else {
            self.state = next;
            Some(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply() {
        use ConnectionState::*;

        struct TestCase {
            state: ConnectionState,
            retries: u32,
            input: FeedInput,
            expected: Option<ConnectionState>,
            expected_retries: u32,
        }

        let tests = vec![
            TestCase {
                // TC0: start
                state: Disconnected,
                retries: 0,
                input: FeedInput::Start,
                expected: Some(Connecting),
                expected_retries: 0,
            },
            TestCase {
                // TC1: open resets retries
                state: Connecting,
                retries: 3,
                input: FeedInput::Opened,
                expected: Some(Live),
                expected_retries: 0,
            },
            TestCase {
                // TC2: failed connect counts a retry
                state: Connecting,
                retries: 1,
                input: FeedInput::Failed,
                expected: Some(Error),
                expected_retries: 2,
            },
            TestCase {
                // TC3: live connection dropped
                state: Live,
                retries: 0,
                input: FeedInput::Disconnected,
                expected: Some(Error),
                expected_retries: 1,
            },
            TestCase {
                // TC4: backoff at the threshold retries
                state: Error,
                retries: 2,
                input: FeedInput::BackoffElapsed,
                expected: Some(Connecting),
                expected_retries: 2,
            },
            TestCase {
                // TC5: backoff past the threshold polls
                state: Error,
                retries: 3,
                input: FeedInput::BackoffElapsed,
                expected: Some(Polling),
                expected_retries: 3,
            },
            TestCase {
                // TC6: failed upgrade probe stays polling
                state: Polling,
                retries: 3,
                input: FeedInput::Failed,
                expected: None,
                expected_retries: 3,
            },
            TestCase {
                // TC7: successful upgrade probe
                state: Polling,
                retries: 3,
                input: FeedInput::Opened,
                expected: Some(Live),
                expected_retries: 0,
            },
            TestCase {
                // TC8: messages are not state changes
                state: Live,
                retries: 0,
                input: FeedInput::Opened,
                expected: None,
                expected_retries: 0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut machine = FeedStateMachine {
                state: test.state,
                retries: test.retries,
                max_retries: 2,
            };
            let actual = machine.apply(test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(machine.retries(), test.expected_retries, "TC{} retries", index);
        }
    }

    #[test]
    fn test_falls_back_to_polling_after_threshold() {
        let mut machine = FeedStateMachine::new(1);
        machine.apply(FeedInput::Start);

        machine.apply(FeedInput::Failed);
        assert_eq!(machine.apply(FeedInput::BackoffElapsed), Some(ConnectionState::Connecting));
        machine.apply(FeedInput::Failed);
        assert!(machine.exhausted());
        assert_eq!(machine.apply(FeedInput::BackoffElapsed), Some(ConnectionState::Polling));
    }
}
