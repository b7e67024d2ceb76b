use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::image_ref::ImageIdentity;

/// Monotonic order of load requests. Later tickets win commits.
pub type LoadTicket = u64;

/// What the caller should do with a load request.
#[derive(Debug)]
pub enum Decision {
    /// Start the load; call [`LoadGuard::finish`] with the ticket once it settles.
    Proceed(LoadTicket),
    /// Nothing to load and nothing in flight; the request is already settled.
    AlreadySettled,
    /// Another load is in flight; wait for it instead of loading again.
    Join(InFlightLoad),
    /// The committed image was requested again while a different image was
    /// loading. That load is retired; commits older than the ticket lose.
    KeepActive(LoadTicket),
}

/// Completion signal of a load that is already running.
#[derive(Debug)]
pub struct InFlightLoad {
    ticket: LoadTicket,
    settled: watch::Receiver<bool>,
}

impl InFlightLoad {
    #[cfg(test)]
    pub(crate) fn ticket(&self) -> LoadTicket {
        self.ticket
    }

    /// Resolves when the joined load finishes, or when the guard that owned
    /// it is dropped.
    pub async fn settled(mut self) {
        let _ = self.settled.wait_for(|settled| *settled).await;
    }
}

struct InFlight {
    identity: Option<ImageIdentity>,
    ticket: LoadTicket,
    settled: watch::Sender<bool>,
}

impl InFlight {
    fn join(&self) -> InFlightLoad {
        InFlightLoad {
            ticket: self.ticket,
            settled: self.settled.subscribe(),
        }
    }
}

#[derive(Default)]
struct GuardState {
    last_ticket: LoadTicket,
    current: Option<InFlight>,
    // Loads that lost the slot but have not settled yet; their joiners still
    // wait for the real outcome.
    superseded: Vec<InFlight>,
}

impl GuardState {
    fn next_ticket(&mut self) -> LoadTicket {
        self.last_ticket += 1;
        self.last_ticket
    }

    // Moves the slot holder to `superseded` and hands out a ticket that
    // outranks it.
    fn retire_current(&mut self) -> Option<LoadTicket> {
        let retired = self.current.take()?;
        let ticket = self.next_ticket();
        debug!(
            retired = ?retired.identity,
            retired_ticket = retired.ticket,
            ticket,
            "in-flight load retired"
        );
        self.superseded.push(retired);
        Some(ticket)
    }
}

/// Remembers the identity currently being loaded so that re-entrant
/// requests for the same image do not decode it twice.
#[derive(Default)]
pub struct LoadGuard {
    state: Mutex<GuardState>,
}

impl LoadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides for `candidate` against the in-flight slot and the committed
    /// image. A proceeding request takes over the slot, even from a load of a
    /// different identity.
    pub fn decide(
        &self,
        candidate: Option<&ImageIdentity>,
        active: Option<&ImageIdentity>,
    ) -> Decision {
        let mut state = self.state.lock();
        let same_as_in_flight = state
            .current
            .as_ref()
            .is_some_and(|current| current.identity.as_ref() == candidate);
        let requests_active = candidate.is_some() && candidate == active;
        if requests_active && !same_as_in_flight {
            if let Some(ticket) = state.retire_current() {
                return Decision::KeepActive(ticket);
            }
        }
        let skip =
            same_as_in_flight || requests_active || (candidate.is_none() && active.is_some());

        if skip {
            return match &state.current {
                Some(current) => {
                    debug!(
                        candidate = ?candidate,
                        in_flight = ?current.identity,
                        ticket = current.ticket,
                        "joining in-flight load"
                    );
                    Decision::Join(current.join())
                }
                None => {
                    debug!(candidate = ?candidate, "image already active; nothing to load");
                    Decision::AlreadySettled
                }
            };
        }

        let ticket = state.next_ticket();
        let (settled, _) = watch::channel(false);
        let next = InFlight {
            identity: candidate.cloned(),
            ticket,
            settled,
        };
        if let Some(previous) = state.current.replace(next) {
            debug!(
                previous = ?previous.identity,
                previous_ticket = previous.ticket,
                ticket,
                "newer load takes over the guard"
            );
            state.superseded.push(previous);
        }
        Decision::Proceed(ticket)
    }

    /// Marks `ticket` as settled. The slot is cleared only if it still holds
    /// that ticket.
    pub fn finish(&self, ticket: LoadTicket) {
        let mut state = self.state.lock();
        if state
            .current
            .as_ref()
            .is_some_and(|current| current.ticket == ticket)
        {
            if let Some(current) = state.current.take() {
                current.settled.send_replace(true);
            }
            return;
        }
        if let Some(index) = state.superseded.iter().position(|s| s.ticket == ticket) {
            debug!(ticket, "superseded load settled");
            state.superseded.swap_remove(index).settled.send_replace(true);
        }
    }

    /// Keeps the committed image over whatever is loading. Returns the ticket
    /// that outranks the retired load, or `None` when nothing was in flight.
    pub fn keep_active(&self) -> Option<LoadTicket> {
        self.state.lock().retire_current()
    }

    /// Identity of the load holding the slot, if any. The inner `None` is a
    /// load of an empty candidate.
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> Option<Option<ImageIdentity>> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|current| current.identity.clone())
    }
}
