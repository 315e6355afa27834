//! Wire frames for the result stream protocol.

use serde::{Deserialize, Serialize};

use crate::campaigns::DistributedQueryResult;

/// Frames sent by a viewer client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Must be the first frame on the connection.
    Auth { token: String },
    /// Bind (or re-bind) this connection to one campaign's topic.
    SelectCampaign { campaign_id: u64 },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// One host's result for the bound campaign.
    Result(DistributedQueryResult),
    /// Stream-level problem that did not terminate the connection, e.g. a
    /// subscription gap.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::ResultHost;
    use std::collections::BTreeMap;

    #[test]
    fn test_client_frame_shapes() {
        let auth: ClientFrame =
            serde_json::from_str(r#"{"type":"auth","data":{"token":"t0k3n"}}"#).unwrap();
        assert_eq!(
            auth,
            ClientFrame::Auth {
                token: "t0k3n".to_string()
            }
        );

        let select: ClientFrame =
            serde_json::from_str(r#"{"type":"select_campaign","data":{"campaign_id":99}}"#)
                .unwrap();
        assert_eq!(select, ClientFrame::SelectCampaign { campaign_id: 99 });
    }

    #[test]
    fn test_result_frame_shape() {
        let frame = ServerFrame::Result(DistributedQueryResult {
            campaign_id: 99,
            host: ResultHost {
                id: 1,
                hostname: "host1".to_string(),
            },
            rows: vec![BTreeMap::from([("col1".to_string(), "aaa".to_string())])],
            error: None,
        });

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["data"]["distributed_query_campaign_id"], 99);
        assert_eq!(json["data"]["host"]["hostname"], "host1");
        assert!(json["data"]["error"].is_null());
    }
}
