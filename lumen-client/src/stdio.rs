//! Newline-delimited JSON between the embedding host and the control loop.
//!
//! Each input line is either a host request
//! (`{"callbackId":1,"method":"startRequest","params":[...]}`) or a focus
//! notification (`{"focus":true}`). Every reply is written as one line.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use lumen_core::bridge::HostReceiver;
use lumen_core::{ControlEvent, ControlSender, HostRequest, StreamError};

/// Longest accepted input line.
const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundLine {
    Focus { focus: bool },
    Request(HostRequest),
}

/// Parse one input line into a control event.
pub fn parse_line(line: &str) -> Result<ControlEvent, StreamError> {
    Ok(match serde_json::from_str(line)? {
        InboundLine::Focus { focus } => ControlEvent::FocusChanged(focus),
        InboundLine::Request(request) => ControlEvent::Host(request),
    })
}

fn codec_error(e: LinesCodecError) -> StreamError {
    match e {
        LinesCodecError::Io(e) => StreamError::Io(e),
        other => StreamError::Other(other.to_string()),
    }
}

/// Forward input lines to the control loop until end of input.
/// Malformed lines are logged and skipped.
pub async fn forward_requests<R>(input: R, events: &ControlSender) -> Result<(), StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("discarding oversized host line");
                continue;
            }
            Err(e) => return Err(codec_error(e)),
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(event) => events.send(event)?,
            Err(e) => warn!("ignoring malformed host line: {e}"),
        }
    }
    debug!("host input closed");
    Ok(())
}

/// Write host messages as JSON lines until every sender is dropped.
pub async fn write_messages<W>(output: W, mut messages: HostReceiver) -> Result<(), StreamError>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(output, LinesCodec::new());
    while let Some(message) = messages.recv().await {
        sink.send(message.to_json()?).await.map_err(codec_error)?;
    }
    SinkExt::<String>::close(&mut sink)
        .await
        .map_err(codec_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::HostMessage;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    #[test]
    fn parses_requests_and_focus() {
        let event =
            parse_line(r#"{"callbackId":4,"method":"openUrl","params":["http://h/"]}"#).unwrap();
        assert!(matches!(
            event,
            ControlEvent::Host(HostRequest { callback_id: 4, ref method, .. }) if method == "openUrl"
        ));

        let event = parse_line(r#"{"focus":false}"#).unwrap();
        assert!(matches!(event, ControlEvent::FocusChanged(false)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"method":"pair"}"#).is_err());
    }

    #[tokio::test]
    async fn forwards_lines_and_skips_bad_ones() {
        let input: &[u8] =
            b"{\"callbackId\":1,\"method\":\"stopRequest\"}\n\nbogus\n{\"focus\":true}\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio_test::assert_ok!(forward_requests(input, &tx).await);

        assert!(matches!(rx.try_recv(), Ok(ControlEvent::Host(_))));
        assert!(matches!(rx.try_recv(), Ok(ControlEvent::FocusChanged(true))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn writes_one_line_per_message() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(HostMessage::status("Connection Established")).unwrap();
        tx.send(HostMessage::StreamTerminated).unwrap();
        drop(tx);

        let (writer, mut reader) = tokio::io::duplex(4096);
        write_messages(writer, rx).await.unwrap();

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], r#"{"type":"streamTerminated"}"#);
    }
}
