//! MCP server exposing the perception tools over stdio

use log::{debug, info};
use perception::Tools;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::model::{
    CallToolResult, Content, ErrorData, Implementation, ServerCapabilities, ServerInfo,
};
use rmcp::{ServerHandler, ServiceExt, tool, tool_handler, tool_router};

/// Clairvoyant MCP server
///
/// Tool calls only read through the poller handle held by [`Tools`].
#[derive(Clone)]
pub struct ClairvoyantServer {
    tools: Tools,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ClairvoyantServer {
    pub fn new(tools: Tools) -> Self {
        Self {
            tools,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "read_mind",
        description = "Read the mind of the user. Returns the thought the user is thinking about."
    )]
    async fn read_mind(&self) -> Result<CallToolResult, ErrorData> {
        debug!("Tool call read_mind");
        Ok(CallToolResult::success(vec![Content::text(
            self.tools.read_mind(),
        )]))
    }

    #[tool(
        name = "predict_the_future",
        description = "Predict the future. Returns a future event the user will experience."
    )]
    async fn predict_the_future(&self) -> Result<CallToolResult, ErrorData> {
        debug!("Tool call predict_the_future");
        Ok(CallToolResult::success(vec![Content::text(
            self.tools.predict_the_future(),
        )]))
    }

    #[tool(
        name = "status",
        description = "Report poller liveness: ticks run, items waiting, the current watermark and how credentials are protected."
    )]
    async fn status(&self) -> Result<CallToolResult, ErrorData> {
        debug!("Tool call status");
        let status = serde_json::to_string(&self.tools.status()).map_err(|e| {
            ErrorData::internal_error(format!("Failed to encode status: {}", e), None)
        })?;
        Ok(CallToolResult::success(vec![Content::text(status)]))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ClairvoyantServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "clairvoyant".to_string(),
                title: Some("Clairvoyant MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Clairvoyant MCP Server. Use read_mind to collect what the user has been \
                 thinking about since the last read, predict_the_future for a glimpse ahead \
                 and status to check that perception is alive."
                    .to_string(),
            ),
        }
    }
}

/// Serve MCP over stdin/stdout until the client disconnects
pub async fn serve_stdio(tools: Tools) -> anyhow::Result<()> {
    let service = ClairvoyantServer::new(tools)
        .serve(rmcp::transport::stdio())
        .await?;
    info!("MCP server initialized, waiting for requests");
    service.waiting().await?;
    info!("MCP client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use perception::error::{AuthError, FetchError};
    use perception::{Fetcher, PerceivedItem, PollOptions, Poller, ProtectionLevel, TokenSource};
    use std::sync::Arc;

    struct NoToken;

    impl TokenSource for NoToken {
        fn access_token(&self) -> Result<String, AuthError> {
            Err(AuthError::InteractionRequired)
        }
    }

    struct NoFetch;

    impl Fetcher for NoFetch {
        fn fetch_since(
            &self,
            _access_token: &str,
            _watermark: DateTime<Utc>,
        ) -> Result<Vec<PerceivedItem>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn poller() -> Poller {
        Poller::new(Arc::new(NoToken), Arc::new(NoFetch), PollOptions::default())
    }

    fn text(result: &CallToolResult) -> String {
        assert_ne!(result.is_error, Some(true));
        result.content[0]
            .as_text()
            .expect("text content")
            .text
            .clone()
    }

    #[test]
    fn test_tools_registered() {
        let server = ClairvoyantServer::new(Tools::new(poller().handle(), ProtectionLevel::Plaintext));
        let mut names: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["predict_the_future", "read_mind", "status"]);
    }

    #[test]
    fn test_server_info() {
        let server = ClairvoyantServer::new(Tools::new(poller().handle(), ProtectionLevel::Plaintext));
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert_eq!(info.server_info.title.as_deref(), Some("Clairvoyant MCP Server"));
        assert!(info.instructions.unwrap().contains("read_mind"));
    }

    #[tokio::test]
    async fn test_read_mind_returns_items_once() {
        let poller = poller();
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 1).unwrap();
        poller.handle().buffer().append(PerceivedItem::new("m1", ts, "hello"));
        let server = ClairvoyantServer::new(Tools::new(poller.handle(), ProtectionLevel::Encrypted));

        let first = text(&server.read_mind().await.unwrap());
        let items: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(items[0]["id"], "m1");
        assert_eq!(items[0]["body"], "hello");

        let second = text(&server.read_mind().await.unwrap());
        assert_eq!(second, "No thoughts detected.");
    }

    #[tokio::test]
    async fn test_prediction() {
        let server = ClairvoyantServer::new(Tools::new(poller().handle(), ProtectionLevel::Plaintext));
        let result = server.predict_the_future().await.unwrap();
        assert_eq!(text(&result), "Nine of Hearts");
    }

    #[tokio::test]
    async fn test_status_reports_protection() {
        let server = ClairvoyantServer::new(Tools::new(poller().handle(), ProtectionLevel::Plaintext));
        let status: serde_json::Value =
            serde_json::from_str(&text(&server.status().await.unwrap())).unwrap();

        assert_eq!(status["ticks"], 0);
        assert_eq!(status["buffered"], 0);
        assert_eq!(status["protection"], "plaintext");
    }
}
