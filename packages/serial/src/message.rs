use crate::frame::ControlByte;
use bytes::Bytes;
use cookie_factory as cf;
use homewave_core::checksum::frame_checksum;
use homewave_core::prelude::*;
use std::fmt::Debug;

/// An immutable outbound Serial API frame, built once and retransmitted
/// verbatim on retry. The callback id is assigned by the send scheduler
/// just before the first transmission and survives retries.
#[derive(Clone, PartialEq)]
pub struct Message {
    function: FunctionType,
    payload: Vec<u8>,
    expects_response: bool,
    needs_callback: bool,
    callback_id: Option<u8>,
    target_node: Option<NodeId>,
}

impl Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("function", &self.function)
            .field("payload", &format_args!("0x{}", hex::encode(&self.payload)))
            .field("callback_id", &self.callback_id)
            .field("target_node", &self.target_node)
            .finish()
    }
}

impl Message {
    pub fn request(function: FunctionType) -> MessageBuilder {
        MessageBuilder {
            message: Message {
                function,
                payload: Vec::new(),
                expects_response: false,
                needs_callback: false,
                callback_id: None,
                target_node: None,
            },
        }
    }

    /// A ZW_SEND_DATA frame carrying one command-class payload to a node.
    /// Appends the standard transmit options (ACK | AUTO_ROUTE).
    pub fn send_data(target: NodeId, class_payload: &[u8]) -> Message {
        let mut payload = Vec::with_capacity(class_payload.len() + 3);
        payload.push(u8::from(target));
        payload.push(class_payload.len() as u8);
        payload.extend_from_slice(class_payload);
        payload.push(default_transmit_options());

        Message::request(FunctionType::SendData)
            .payload(payload)
            .expect_response()
            .expect_callback()
            .target(target)
            .build()
    }

    pub fn get_version() -> Message {
        Message::request(FunctionType::GetVersion).expect_response().build()
    }

    pub fn memory_get_id() -> Message {
        Message::request(FunctionType::MemoryGetId).expect_response().build()
    }

    pub fn get_init_data() -> Message {
        Message::request(FunctionType::GetInitData).expect_response().build()
    }

    pub fn get_node_protocol_info(node: NodeId) -> Message {
        Message::request(FunctionType::GetNodeProtocolInfo)
            .payload(vec![u8::from(node)])
            .expect_response()
            .build()
    }

    /// Asks the stick to fetch a node's NIF. The useful answer arrives
    /// later as an APPLICATION_UPDATE request.
    pub fn request_node_info(node: NodeId) -> Message {
        Message::request(FunctionType::RequestNodeInfo)
            .payload(vec![u8::from(node)])
            .expect_response()
            .target(node)
            .build()
    }

    pub fn soft_reset() -> Message {
        Message::request(FunctionType::SerialSoftReset).build()
    }

    pub fn set_default() -> Message {
        Message::request(FunctionType::SetDefault).expect_callback().build()
    }

    pub fn add_node_to_network(mode: u8) -> Message {
        Message::request(FunctionType::AddNodeToNetwork)
            .payload(vec![mode])
            .expect_callback()
            .build()
    }

    pub fn remove_node_from_network(mode: u8) -> Message {
        Message::request(FunctionType::RemoveNodeFromNetwork)
            .payload(vec![mode])
            .expect_callback()
            .build()
    }

    pub fn request_node_neighbor_update(node: NodeId) -> Message {
        Message::request(FunctionType::RequestNodeNeighborUpdate)
            .payload(vec![u8::from(node)])
            .expect_callback()
            .target(node)
            .build()
    }

    pub fn request_network_update() -> Message {
        Message::request(FunctionType::RequestNetworkUpdate).expect_callback().build()
    }

    pub fn function(&self) -> FunctionType {
        self.function
    }

    pub fn payload_bytes(&self) -> &[u8] {
        &self.payload
    }

    pub fn expects_response(&self) -> bool {
        self.expects_response
    }

    pub fn expects_callback(&self) -> bool {
        self.needs_callback
    }

    pub fn callback_id(&self) -> Option<u8> {
        self.callback_id
    }

    /// Assigned once by the scheduler; retries keep the same id.
    pub fn set_callback_id(&mut self, id: u8) {
        debug_assert!(id != 0);
        self.callback_id = Some(id);
    }

    /// The node this message radios to; `None` addresses the stick itself.
    pub fn target_node(&self) -> Option<NodeId> {
        self.target_node
    }

    /// Serializes the full frame: SOF, LEN, TYPE, FUNC, payload,
    /// callback id (when requested), checksum.
    pub fn serialize(&self) -> Bytes {
        use cf::{bytes::be_u8, combinator::slice, sequence::tuple};

        let callback = self.callback_id.filter(|_| self.needs_callback);
        let len = self.payload.len() as u8 + 3 + callback.map_or(0, |_| 1);

        let body = cf::gen_simple(
            tuple((
                be_u8(ControlByte::SOF as u8),
                be_u8(len),
                be_u8(FrameKind::Request as u8),
                be_u8(self.function as u8),
                slice(&self.payload),
                move |out| match callback {
                    Some(id) => be_u8(id)(out),
                    None => Ok(out),
                },
                be_u8(0), // checksum placeholder
            )),
            Vec::new(),
        )
        .expect("serializing into a Vec cannot fail");

        let mut body = body;
        let end = body.len() - 1;
        body[end] = frame_checksum(&body[1..end]);
        Bytes::from(body)
    }
}

pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.message.payload = payload;
        self
    }

    pub fn expect_response(mut self) -> Self {
        self.message.expects_response = true;
        self
    }

    pub fn expect_callback(mut self) -> Self {
        self.message.needs_callback = true;
        self
    }

    pub fn target(mut self, node: NodeId) -> Self {
        self.message.target_node = Some(node);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serialize_plain_request() {
        let msg = Message::get_init_data();
        assert_eq!(msg.serialize().as_ref(), hex::decode("01030002fe").unwrap());
    }

    #[test]
    fn test_serialize_send_data() {
        // BinarySwitch::Set(0xff) to node 2 with callback id 0x21:
        // SOF LEN REQ 0x13 node len cc cmd value txopts cbid chk
        let mut msg = Message::send_data(NodeId::new(2), &[0x25, 0x01, 0xff]);
        msg.set_callback_id(0x21);
        let frame = msg.serialize();
        let expected = hex::decode("010a001302032501ff052118").unwrap();
        assert_eq!(frame.as_ref(), expected);
    }

    #[test]
    fn test_callback_id_survives_reserialization() {
        let mut msg = Message::send_data(NodeId::new(5), &[0x00]);
        msg.set_callback_id(7);
        assert_eq!(msg.serialize(), msg.serialize());
    }
}
