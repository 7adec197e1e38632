//! Frame-to-event stream adapter

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::protocol::Session;
use crate::{CommandEvent, Frame};

/// Extension trait to reconstruct command events from any frame stream
pub trait ReconstructExt: Stream<Item = Frame> {
    /// Feed every frame through `session`, yielding the events it completes
    fn reconstruct(self, session: Session) -> Reconstruct<Self>
    where
        Self: Sized,
    {
        Reconstruct::new(self, session)
    }
}

impl<T: Stream<Item = Frame>> ReconstructExt for T {}

pin_project! {
    /// A stream combinator that drives a protocol session
    pub struct Reconstruct<S> {
        #[pin]
        frames: S,
        session: Session,
    }
}

impl<S> Reconstruct<S> {
    pub fn new(frames: S, session: Session) -> Self {
        Self { frames, session }
    }

    /// The session, e.g. to inspect learned statements once the stream has ended
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }
}

impl<S: Stream<Item = Frame>> Stream for Reconstruct<S> {
    type Item = CommandEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Frames that complete nothing are consumed without yielding
        loop {
            match ready!(this.frames.as_mut().poll_next(cx)) {
                Some(frame) => {
                    if let Some(event) = this.session.handle(frame) {
                        return Poll::Ready(Some(event));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.frames.size_hint().1)
    }
}
