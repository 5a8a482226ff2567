//! Moves payload from the codec to an [`Inbound`](crate::channel::Inbound)
//! consumer, one demanded chunk at a time.

use std::future::{Future, pending};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::channel::{ChannelOperations, Demand, InboundSender};
use crate::protocol::{ChannelError, Message, ParseError, PayloadItem};

pub(crate) struct BodyPump {
    sender: Option<InboundSender<Bytes>>,
    finished: bool,
}

impl BodyPump {
    pub(crate) fn new(sender: InboundSender<Bytes>) -> Self {
        Self { sender: Some(sender), finished: false }
    }

    /// A pump nobody consumes; only useful to [`drain`](Self::drain).
    pub(crate) fn detached() -> Self {
        Self { sender: None, finished: false }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn wants(&self) -> bool {
        self.sender.is_some() && !self.finished
    }

    /// The next demand; `None` once the consumer went away. Never resolves
    /// on a detached pump.
    pub(crate) async fn demand(&mut self) -> Option<Demand<Bytes>> {
        match &mut self.sender {
            Some(sender) => sender.demand().await,
            None => pending().await,
        }
    }

    /// Answers one demand with the next payload item.
    ///
    /// A failure is handed to the consumer; the caller only learns that the
    /// exchange is over.
    pub(crate) async fn serve<IO, C, Out, H>(
        &mut self,
        demand: Option<Demand<Bytes>>,
        ops: &mut ChannelOperations<IO, C, Out>,
    ) -> Result<(), ChannelError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
        C: Decoder<Item = Message<H>> + Encoder<Out>,
        ChannelError: From<<C as Decoder>::Error> + From<<C as Encoder<Out>>::Error>,
    {
        let Some(demand) = demand else {
            trace!(connection_id = ops.connection().id(), "body consumer dropped");
            self.sender = None;
            return Ok(());
        };

        match ops.receive().await {
            Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => {
                demand.deliver(bytes);
                Ok(())
            }
            Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                self.finished = true;
                demand.complete();
                Ok(())
            }
            Some(Ok(Message::Header(_))) => {
                demand.fail(ParseError::invalid_body("message head inside a payload").into());
                Err(ChannelError::Closed)
            }
            Some(Err(e)) => {
                demand.fail(e);
                Err(ChannelError::Closed)
            }
            None => {
                demand.fail(ChannelError::Closed);
                Err(ChannelError::Closed)
            }
        }
    }

    /// Reads and drops whatever is left of the payload.
    pub(crate) async fn drain<IO, C, Out, H>(&mut self, ops: &mut ChannelOperations<IO, C, Out>) -> Result<(), ChannelError>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
        C: Decoder<Item = Message<H>> + Encoder<Out>,
        ChannelError: From<<C as Decoder>::Error> + From<<C as Encoder<Out>>::Error>,
    {
        self.sender = None;
        let mut skipped = 0;
        while !self.finished {
            match ops.receive().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => skipped += bytes.len(),
                Some(Ok(Message::Payload(PayloadItem::Eof))) => self.finished = true,
                Some(Ok(Message::Header(_))) => return Err(ParseError::invalid_body("message head inside a payload").into()),
                Some(Err(e)) => return Err(e),
                None => return Err(ChannelError::Closed),
            }
        }
        if skipped > 0 {
            trace!(connection_id = ops.connection().id(), skipped, "drained unread payload");
        }
        Ok(())
    }
}

/// Runs `future` to completion while answering payload demands, so a future
/// that reads the body can make progress.
pub(crate) async fn drive<F, IO, C, Out, H>(
    future: F,
    pump: &mut BodyPump,
    ops: &mut ChannelOperations<IO, C, Out>,
) -> Result<F::Output, ChannelError>
where
    F: Future,
    IO: AsyncRead + AsyncWrite + Unpin,
    C: Decoder<Item = Message<H>> + Encoder<Out>,
    ChannelError: From<<C as Decoder>::Error> + From<<C as Encoder<Out>>::Error>,
{
    tokio::pin!(future);
    loop {
        select! {
            biased;
            output = &mut future => return Ok(output),
            demand = pump.demand(), if pump.wants() => pump.serve(demand, ops).await?,
        }
    }
}
