use crate::codec::FrameCodec;
use crate::error::Result;
use crate::frame::RawFrame;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::{Decoder, Framed};

pub const BAUD_RATE: u32 = 115_200;

/// The byte-level connection to a controller stick. Implemented by the
/// real serial port and by the in-memory mock the tests drive.
pub trait SerialBinding: Send + 'static {
    fn write(&mut self, frame: RawFrame) -> impl Future<Output = Result<()>> + Send;

    /// Waits for the next inbound frame. `None` means the port is gone.
    fn read(&mut self) -> impl Future<Output = Option<RawFrame>> + Send;
}

/// A real controller stick on a serial port, 115200 8-N-1.
pub struct SerialPort {
    writer: SplitSink<Framed<SerialStream, FrameCodec>, RawFrame>,
    reader: SplitStream<Framed<SerialStream, FrameCodec>>,
}

impl SerialPort {
    pub fn open(path: &str) -> Result<Self> {
        #[allow(unused_mut)]
        let mut port = tokio_serial::new(path, BAUD_RATE).open_native_async()?;

        #[cfg(unix)]
        port.set_exclusive(false)?;

        let (writer, reader) = FrameCodec.framed(port).split();
        Ok(Self { writer, reader })
    }
}

impl SerialBinding for SerialPort {
    async fn write(&mut self, frame: RawFrame) -> Result<()> {
        self.writer.send(frame).await?;
        Ok(())
    }

    async fn read(&mut self) -> Option<RawFrame> {
        match self.reader.next().await {
            Some(Ok(frame)) => Some(frame),
            _ => None,
        }
    }
}

/// An in-memory stand-in for the stick. [MockPort] goes to the driver,
/// the paired [MockRemote] stays with the test, which plays the stick's
/// side of the conversation.
pub struct MockPort {
    inbound: mpsc::UnboundedReceiver<RawFrame>,
    outbound: mpsc::UnboundedSender<RawFrame>,
}

pub struct MockRemote {
    to_port: mpsc::UnboundedSender<RawFrame>,
    from_port: mpsc::UnboundedReceiver<RawFrame>,
}

impl MockPort {
    pub fn pair() -> (MockPort, MockRemote) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            MockPort {
                inbound: in_rx,
                outbound: out_tx,
            },
            MockRemote {
                to_port: in_tx,
                from_port: out_rx,
            },
        )
    }
}

impl SerialBinding for MockPort {
    async fn write(&mut self, frame: RawFrame) -> Result<()> {
        // A closed remote behaves like an unplugged stick
        self.outbound
            .send(frame)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock remote gone"))?;
        Ok(())
    }

    async fn read(&mut self) -> Option<RawFrame> {
        self.inbound.recv().await
    }
}

impl MockRemote {
    /// Injects a frame as if the stick had sent it.
    pub fn inject(&self, frame: RawFrame) {
        let _ = self.to_port.send(frame);
    }

    /// Injects a data frame given as hex, e.g. a canned response.
    pub fn inject_hex(&self, hex_frame: &str) {
        let bytes = hex::decode(hex_frame).expect("valid hex frame");
        self.inject(RawFrame::Data(bytes.into()));
    }

    /// Waits for the next frame the driver wrote to the port.
    pub async fn written(&mut self) -> Option<RawFrame> {
        self.from_port.recv().await
    }

    /// Returns an already-written frame without waiting, if any.
    pub fn try_written(&mut self) -> Option<RawFrame> {
        self.from_port.try_recv().ok()
    }
}
