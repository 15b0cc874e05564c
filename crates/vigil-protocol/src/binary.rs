//! Binary frames.
//!
//! Every frame starts with a one-byte opcode. Integers are little-endian,
//! strings are length-prefixed with a `u32`, and payloads run to the end of
//! the frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vigil_core::{CallId, ClientChannelId, ServiceId, SubscriptionId};

use crate::error::ProtocolError;

/// Server → client opcodes.
pub mod server_op {
    /// Message data for a subscription.
    pub const MESSAGE_DATA: u8 = 0x01;
    /// Server clock.
    pub const TIME: u8 = 0x02;
    /// Service call response.
    pub const SERVICE_CALL_RESPONSE: u8 = 0x03;
    /// Fetch asset response.
    pub const FETCH_ASSET_RESPONSE: u8 = 0x04;
}

/// Client → server opcodes.
pub mod client_op {
    /// Message data on a client-advertised channel.
    pub const MESSAGE_DATA: u8 = 0x01;
    /// Service call request.
    pub const SERVICE_CALL_REQUEST: u8 = 0x02;
}

const ASSET_STATUS_OK: u8 = 0;
const ASSET_STATUS_ERROR: u8 = 1;

/// A service call as carried in a binary client frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceCallRequest {
    /// Target service.
    pub service_id: ServiceId,
    /// Client-chosen call id.
    pub call_id: CallId,
    /// Request encoding.
    pub encoding: String,
    /// Raw request body.
    pub payload: Bytes,
}

/// A binary frame from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientBinaryMessage {
    /// Data on a client-advertised channel.
    MessageData {
        /// Client channel id.
        channel_id: ClientChannelId,
        /// Message bytes.
        payload: Bytes,
    },
    /// A service call.
    ServiceCallRequest(ServiceCallRequest),
}

impl ClientBinaryMessage {
    /// Decode a binary frame.
    pub fn decode(mut frame: Bytes) -> Result<Self, ProtocolError> {
        match take_u8(&mut frame)? {
            client_op::MESSAGE_DATA => {
                let channel_id = ClientChannelId::new(take_u32(&mut frame)?);
                Ok(Self::MessageData {
                    channel_id,
                    payload: frame,
                })
            }
            client_op::SERVICE_CALL_REQUEST => {
                let service_id = ServiceId::new(take_u32(&mut frame)?);
                let call_id = CallId::new(take_u32(&mut frame)?);
                let encoding = take_string(&mut frame, "encoding")?;
                Ok(Self::ServiceCallRequest(ServiceCallRequest {
                    service_id,
                    call_id,
                    encoding,
                    payload: frame,
                }))
            }
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    /// Encode to a binary frame.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::MessageData {
                channel_id,
                payload,
            } => {
                let mut buf = BytesMut::with_capacity(5 + payload.len());
                buf.put_u8(client_op::MESSAGE_DATA);
                buf.put_u32_le(channel_id.get());
                buf.put_slice(payload);
                buf.freeze()
            }
            Self::ServiceCallRequest(req) => {
                let mut buf =
                    BytesMut::with_capacity(13 + req.encoding.len() + req.payload.len());
                buf.put_u8(client_op::SERVICE_CALL_REQUEST);
                buf.put_u32_le(req.service_id.get());
                buf.put_u32_le(req.call_id.get());
                put_string(&mut buf, &req.encoding);
                buf.put_slice(&req.payload);
                buf.freeze()
            }
        }
    }
}

/// A binary frame from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerBinaryMessage {
    /// A message on a subscribed channel.
    MessageData {
        /// Subscription the message is delivered for.
        subscription_id: SubscriptionId,
        /// When the message was logged, in nanoseconds.
        log_time: u64,
        /// When the message was published, in nanoseconds.
        publish_time: u64,
        /// Per-channel sequence number.
        sequence: u32,
        /// Message bytes.
        payload: Bytes,
    },
    /// Server clock in nanoseconds.
    Time {
        /// Timestamp.
        timestamp: u64,
    },
    /// A successful service call.
    ServiceCallResponse {
        /// Service that was called.
        service_id: ServiceId,
        /// Call being answered.
        call_id: CallId,
        /// Response encoding.
        encoding: String,
        /// Raw response body.
        payload: Bytes,
    },
    /// Result of a `fetchAsset` request.
    FetchAssetResponse {
        /// Request being answered.
        request_id: u32,
        /// Asset bytes or an error message.
        result: Result<Bytes, String>,
    },
}

impl ServerBinaryMessage {
    /// Encode to a binary frame.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::MessageData {
                subscription_id,
                log_time,
                publish_time,
                sequence,
                payload,
            } => {
                let mut buf = BytesMut::with_capacity(25 + payload.len());
                buf.put_u8(server_op::MESSAGE_DATA);
                buf.put_u32_le(subscription_id.get());
                buf.put_u64_le(*log_time);
                buf.put_u64_le(*publish_time);
                buf.put_u32_le(*sequence);
                buf.put_slice(payload);
                buf.freeze()
            }
            Self::Time { timestamp } => {
                let mut buf = BytesMut::with_capacity(9);
                buf.put_u8(server_op::TIME);
                buf.put_u64_le(*timestamp);
                buf.freeze()
            }
            Self::ServiceCallResponse {
                service_id,
                call_id,
                encoding,
                payload,
            } => {
                let mut buf = BytesMut::with_capacity(13 + encoding.len() + payload.len());
                buf.put_u8(server_op::SERVICE_CALL_RESPONSE);
                buf.put_u32_le(service_id.get());
                buf.put_u32_le(call_id.get());
                put_string(&mut buf, encoding);
                buf.put_slice(payload);
                buf.freeze()
            }
            Self::FetchAssetResponse { request_id, result } => {
                let mut buf = BytesMut::with_capacity(10);
                buf.put_u8(server_op::FETCH_ASSET_RESPONSE);
                buf.put_u32_le(*request_id);
                match result {
                    Ok(data) => {
                        buf.put_u8(ASSET_STATUS_OK);
                        put_string(&mut buf, "");
                        buf.put_slice(data);
                    }
                    Err(message) => {
                        buf.put_u8(ASSET_STATUS_ERROR);
                        put_string(&mut buf, message);
                    }
                }
                buf.freeze()
            }
        }
    }

    /// Decode a binary frame.
    pub fn decode(mut frame: Bytes) -> Result<Self, ProtocolError> {
        match take_u8(&mut frame)? {
            server_op::MESSAGE_DATA => {
                let subscription_id = SubscriptionId::new(take_u32(&mut frame)?);
                let log_time = take_u64(&mut frame)?;
                let publish_time = take_u64(&mut frame)?;
                let sequence = take_u32(&mut frame)?;
                Ok(Self::MessageData {
                    subscription_id,
                    log_time,
                    publish_time,
                    sequence,
                    payload: frame,
                })
            }
            server_op::TIME => Ok(Self::Time {
                timestamp: take_u64(&mut frame)?,
            }),
            server_op::SERVICE_CALL_RESPONSE => {
                let service_id = ServiceId::new(take_u32(&mut frame)?);
                let call_id = CallId::new(take_u32(&mut frame)?);
                let encoding = take_string(&mut frame, "encoding")?;
                Ok(Self::ServiceCallResponse {
                    service_id,
                    call_id,
                    encoding,
                    payload: frame,
                })
            }
            server_op::FETCH_ASSET_RESPONSE => {
                let request_id = take_u32(&mut frame)?;
                let status = take_u8(&mut frame)?;
                let error = take_string(&mut frame, "error message")?;
                let result = if status == ASSET_STATUS_OK {
                    Ok(frame)
                } else {
                    Err(error)
                };
                Ok(Self::FetchAssetResponse { request_id, result })
            }
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

fn ensure(frame: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if frame.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            remaining: frame.remaining(),
        });
    }
    Ok(())
}

fn take_u8(frame: &mut Bytes) -> Result<u8, ProtocolError> {
    if frame.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    Ok(frame.get_u8())
}

fn take_u32(frame: &mut Bytes) -> Result<u32, ProtocolError> {
    ensure(frame, 4)?;
    Ok(frame.get_u32_le())
}

fn take_u64(frame: &mut Bytes) -> Result<u64, ProtocolError> {
    ensure(frame, 8)?;
    Ok(frame.get_u64_le())
}

fn take_string(frame: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    let len = take_u32(frame)? as usize;
    ensure(frame, len)?;
    let raw = frame.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
}

fn put_string(buf: &mut BytesMut, s: &str) {
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn message_data_layout() {
        let frame = ServerBinaryMessage::MessageData {
            subscription_id: SubscriptionId::new(1),
            log_time: 2,
            publish_time: 3,
            sequence: 4,
            payload: Bytes::from_static(b"{}"),
        }
        .encode();
        assert_eq!(frame[0], server_op::MESSAGE_DATA);
        assert_eq!(&frame[1..5], &1u32.to_le_bytes());
        assert_eq!(&frame[5..13], &2u64.to_le_bytes());
        assert_eq!(&frame[13..21], &3u64.to_le_bytes());
        assert_eq!(&frame[21..25], &4u32.to_le_bytes());
        assert_eq!(&frame[25..], b"{}");
    }

    #[test]
    fn time_layout() {
        let frame = ServerBinaryMessage::Time { timestamp: 42 }.encode();
        assert_eq!(frame.len(), 9);
        assert_eq!(frame[0], server_op::TIME);
        assert_eq!(&frame[1..], &42u64.to_le_bytes());
    }

    #[test]
    fn decode_service_call_request() {
        let mut buf = BytesMut::new();
        buf.put_u8(client_op::SERVICE_CALL_REQUEST);
        buf.put_u32_le(5);
        buf.put_u32_le(9);
        buf.put_u32_le(4);
        buf.put_slice(b"json");
        buf.put_slice(b"{\"a\":1}");
        let msg = ClientBinaryMessage::decode(buf.freeze()).unwrap();
        assert_eq!(
            msg,
            ClientBinaryMessage::ServiceCallRequest(ServiceCallRequest {
                service_id: ServiceId::new(5),
                call_id: CallId::new(9),
                encoding: "json".into(),
                payload: Bytes::from_static(b"{\"a\":1}"),
            })
        );
    }

    #[test]
    fn decode_client_message_data() {
        let frame = ClientBinaryMessage::MessageData {
            channel_id: ClientChannelId::new(3),
            payload: Bytes::from_static(b"abc"),
        }
        .encode();
        let ClientBinaryMessage::MessageData {
            channel_id,
            payload,
        } = ClientBinaryMessage::decode(frame).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(channel_id.get(), 3);
        assert_eq!(&payload[..], b"abc");
    }

    #[test]
    fn empty_frame_rejected() {
        let err = ClientBinaryMessage::decode(Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::EmptyFrame));
    }

    #[test]
    fn unknown_opcode_rejected() {
        let err = ClientBinaryMessage::decode(Bytes::from_static(&[0x09, 0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownOpcode(0x09)));
    }

    #[test]
    fn truncated_header_rejected() {
        let err = ClientBinaryMessage::decode(Bytes::from_static(&[0x01, 0, 0])).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 4,
                remaining: 2
            }
        ));
    }

    #[test]
    fn oversized_encoding_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(client_op::SERVICE_CALL_REQUEST);
        buf.put_u32_le(1);
        buf.put_u32_le(1);
        buf.put_u32_le(1000);
        buf.put_slice(b"json");
        let err = ClientBinaryMessage::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 1000, .. }));
    }

    #[test]
    fn invalid_utf8_encoding_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(client_op::SERVICE_CALL_REQUEST);
        buf.put_u32_le(1);
        buf.put_u32_le(1);
        buf.put_u32_le(2);
        buf.put_slice(&[0xff, 0xfe]);
        let err = ClientBinaryMessage::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8("encoding")));
    }

    #[test]
    fn asset_error_response() {
        let frame = ServerBinaryMessage::FetchAssetResponse {
            request_id: 7,
            result: Err("not found".into()),
        }
        .encode();
        assert_eq!(frame[0], server_op::FETCH_ASSET_RESPONSE);
        assert_eq!(frame[5], ASSET_STATUS_ERROR);
        let back = ServerBinaryMessage::decode(frame).unwrap();
        assert_eq!(
            back,
            ServerBinaryMessage::FetchAssetResponse {
                request_id: 7,
                result: Err("not found".into()),
            }
        );
    }

    proptest! {
        #[test]
        fn client_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = ClientBinaryMessage::decode(Bytes::from(data));
        }

        #[test]
        fn service_call_survives_encoding(
            service in any::<u32>(),
            call in any::<u32>(),
            encoding in "[a-z0-9]{0,12}",
            payload in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let msg = ClientBinaryMessage::ServiceCallRequest(ServiceCallRequest {
                service_id: ServiceId::new(service),
                call_id: CallId::new(call),
                encoding,
                payload: Bytes::from(payload),
            });
            prop_assert_eq!(ClientBinaryMessage::decode(msg.encode()).unwrap(), msg);
        }
    }
}
