use crate::error::{Error, Result};
use bitvec::prelude::*;
use homewave_core::prelude::*;
use nom::{
    bytes::complete::{take, take_till},
    number::complete::{be_u8, be_u32},
};

fn malformed<T>(what: &str) -> Result<T> {
    Err(Error::Parse(format!("malformed {} payload", what)))
}

/// Response to GET_VERSION: the stick's firmware banner and library type.
#[derive(Debug, Clone, PartialEq)]
pub struct GetVersionResponse {
    pub library_version: String,
    pub library_type: u8,
}

impl GetVersionResponse {
    pub fn parse(i: &[u8]) -> Result<Self> {
        let (i, version): (&[u8], &[u8]) =
            take_till(|b| b == 0)(i).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
                Error::Parse("malformed GET_VERSION payload".into())
            })?;
        // Skip the NUL terminator if present
        let i = if i.first() == Some(&0) { &i[1..] } else { i };
        let library_type = i.first().copied().unwrap_or(0);

        Ok(Self {
            library_version: String::from_utf8_lossy(version).trim_end().to_string(),
            library_type,
        })
    }
}

/// Response to MEMORY_GET_ID: the controller's identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryGetIdResponse {
    pub home_id: HomeId,
    pub own_node_id: NodeId,
}

impl MemoryGetIdResponse {
    pub fn parse(i: &[u8]) -> Result<Self> {
        let (i, home_id) = be_u32::<_, nom::error::Error<&[u8]>>(i)
            .map_err(|_| Error::Parse("malformed MEMORY_GET_ID payload".into()))?;
        let (_, own_node_id) = be_u8::<_, nom::error::Error<&[u8]>>(i)
            .map_err(|_| Error::Parse("malformed MEMORY_GET_ID payload".into()))?;

        Ok(Self {
            home_id: HomeId::new(home_id),
            own_node_id: NodeId::new(own_node_id),
        })
    }
}

/// Response to GET_INIT_DATA: which node ids exist in this network.
#[derive(Debug, Clone, PartialEq)]
pub struct GetInitDataResponse {
    pub api_version: u8,
    pub capabilities: u8,
    pub node_ids: Vec<NodeId>,
}

impl GetInitDataResponse {
    pub fn parse(i: &[u8]) -> Result<Self> {
        type E<'a> = nom::error::Error<&'a [u8]>;

        let (i, api_version) = be_u8::<_, E>(i).or_else(|_| malformed("GET_INIT_DATA"))?;
        let (i, capabilities) = be_u8::<_, E>(i).or_else(|_| malformed("GET_INIT_DATA"))?;
        let (i, mask_len) = be_u8::<_, E>(i).or_else(|_| malformed("GET_INIT_DATA"))?;
        let (_, mask) =
            take::<_, _, E>(mask_len as usize)(i).or_else(|_| malformed("GET_INIT_DATA"))?;

        // Bit 0 of byte 0 is node 1
        let bits = BitSlice::<u8, Lsb0>::from_slice(mask);
        let node_ids = bits
            .iter_ones()
            .map(|index| NodeId::new(index as u8 + 1))
            .collect();

        Ok(Self {
            api_version,
            capabilities,
            node_ids,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_version() {
        let mut payload = b"Z-Wave 3.95".to_vec();
        payload.push(0);
        payload.push(0x01);
        let parsed = GetVersionResponse::parse(&payload).unwrap();
        assert_eq!(parsed.library_version, "Z-Wave 3.95");
        assert_eq!(parsed.library_type, 0x01);
    }

    #[test]
    fn test_memory_get_id() {
        let payload = hex::decode("c0ffee0101").unwrap();
        let parsed = MemoryGetIdResponse::parse(&payload).unwrap();
        assert_eq!(parsed.home_id, HomeId::new(0xc0ffee01));
        assert_eq!(parsed.own_node_id, NodeId::new(1));
    }

    #[test]
    fn test_init_data_bitmask() {
        // 29-byte mask with bits for nodes 1 and 2 set
        let mut payload = vec![0x05, 0x00, 29];
        payload.push(0b0000_0011);
        payload.extend_from_slice(&[0; 28]);
        let parsed = GetInitDataResponse::parse(&payload).unwrap();
        assert_eq!(parsed.node_ids, vec![NodeId::new(1), NodeId::new(2)]);
    }

    #[test]
    fn test_init_data_high_node() {
        let mut payload = vec![0x05, 0x00, 29];
        payload.extend_from_slice(&[0; 28]);
        payload.push(0b1000_0000); // bit 7 of byte 28 -> node 232
        let parsed = GetInitDataResponse::parse(&payload).unwrap();
        assert_eq!(parsed.node_ids, vec![NodeId::new(232)]);
    }
}
