// Copyright 2026 The Skitter Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::bail;
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use std::mem;

use crate::messages::WireMessage;

/// Length of the frame header: a little-endian `u32` payload length.
pub const HEADER_LENGTH: usize = mem::size_of::<u32>();

/// Length-prefixed frame codec carrying bincode-encoded [`WireMessage`]s.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    /// Maximum payload length (in bytes), gets populated from
    /// `NetworkConfiguration`.
    max_frame_len: u32,
}

impl FrameCodec {
    /// Creates a codec enforcing the given maximum payload length.
    pub fn new(max_frame_len: u32) -> Self {
        FrameCodec { max_frame_len }
    }
}

impl Decoder for FrameCodec {
    type Item = WireMessage;
    type Error = anyhow::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Framing level
        if buf.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let len = LittleEndian::read_u32(buf) as usize;
        if len > self.max_frame_len as usize {
            bail!(
                "Received frame is too long: received_len = {}, allowed_len = {}",
                len,
                self.max_frame_len
            )
        }
        if buf.len() < HEADER_LENGTH + len {
            return Ok(None);
        }

        let frame = buf.split_to(HEADER_LENGTH + len);
        let message = bincode::deserialize(&frame[HEADER_LENGTH..])?;
        Ok(Some(message))
    }
}

impl Encoder<WireMessage> for FrameCodec {
    type Error = anyhow::Error;

    fn encode(&mut self, message: WireMessage, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&message)?;
        if payload.len() > self.max_frame_len as usize {
            bail!(
                "Outgoing frame is too long: len = {}, allowed_len = {}",
                payload.len(),
                self.max_frame_len
            )
        }
        buf.reserve(HEADER_LENGTH + payload.len());
        buf.put_u32_le(payload.len() as u32);
        buf.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use tokio_util::codec::{Decoder, Encoder};

    use super::*;
    use skitter::{Invocation, Value};

    fn sample_message() -> WireMessage {
        WireMessage::WorkerMsg {
            worker: 1,
            invocation: Invocation::External,
            payload: Value::Int(42),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(sample_message(), &mut buf).unwrap();
        codec.encode(WireMessage::Ping, &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(sample_message()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(WireMessage::Ping));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode(sample_message(), &mut buf).unwrap();

        let mut partial = BytesMut::from(&buf[..HEADER_LENGTH + 1]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        partial.extend_from_slice(&buf[HEADER_LENGTH + 1..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(sample_message()));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::new();
        let err = codec.encode(sample_message(), &mut buf).unwrap_err();
        assert!(err.to_string().contains("Outgoing frame is too long"));

        let mut wide = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        wide.encode(sample_message(), &mut buf).unwrap();
        let mut narrow = FrameCodec::new(4);
        let err = narrow.decode(&mut buf).unwrap_err();
        assert!(err.to_string().contains("Received frame is too long"));
    }
}
