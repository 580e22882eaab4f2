use crate::config::ServerConfig;
use crate::errors::InvalidParamsError;
use crate::patch::model::{
    MakeRequest, OpCatalogResponse, OpDescribeResponse, PatchRequest, PatchResult,
};
use crate::patch::registry;
use crate::state::AppState;
use anyhow::{Result, anyhow};
use rmcp::{
    ErrorData as McpError, Json, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use {once_cell::sync::Lazy, regex::Regex};

const BASE_INSTRUCTIONS: &str = "\
Sheetpatch MCP: create and patch Excel workbooks in validated batches.

WORKFLOW:
1) list_patch_ops to see the op catalog; describe_patch_op for field contracts
2) make_workbook to seed a fresh .xlsx, or patch_workbook against an existing one
3) Batch related ops in one patch_workbook call; the batch is atomic (one save, or none on error)
4) Inspect the returned diff; on failure the error names the op index, field, and a fix hint

TOOL SELECTION:
- patch_workbook: Apply a batch of typed ops to a workbook. Options: dry_run (report only),
  want_inverse_ops (undo script, returned newest-first), preflight_formula_check,
  default_sheet, backend (auto/file/live), on_conflict (overwrite/skip/rename), out_dir/out_name,
  allow_overwrite (required to write over the input file).
- make_workbook: Seed a new workbook (optional sheet_name), then apply ops in place.
- list_patch_ops: Summaries of all op kinds with routing and design eligibility.
- describe_patch_op: Required/optional fields, aliases, target rule, and a worked example for one kind.

OPS:
Writes: add_sheet, set_value, set_formula, set_value_if, set_formula_if, set_range_values, fill_formula.
Design: set_bold, set_font_size, set_font_color, set_fill_color, set_dimensions, set_alignment,
set_style, draw_grid_border, merge_cells, unmerge_cells, auto_fit_columns, apply_table_style,
restore_design_snapshot.
Charts: create_chart (live engine only).

BEST PRACTICES:
- Use dry_run to preview a risky batch; the diff shows what would change.
- Conditional writes (set_value_if/set_formula_if) skip on mismatch instead of failing.
- want_inverse_ops captures design snapshots; feed them back via restore_design_snapshot.
- Relative paths resolve under the server workspace root.";

fn build_instructions(live_enabled: bool) -> String {
    let mut instructions = BASE_INSTRUCTIONS.to_string();
    if live_enabled {
        instructions.push_str(
            "\n\nLive engine enabled: backend 'auto' prefers the attached automation host and \
             create_chart is available.",
        );
    } else {
        instructions.push_str(
            "\n\nLive engine disabled; all ops run on the file engine and create_chart is \
             unavailable. Set SHEETPATCH_MCP_LIVE_ENABLED=true on a Windows desktop host to enable.",
        );
    }
    instructions
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribePatchOpParams {
    /// Operation kind, e.g. "set_value".
    pub kind: String,
}

#[derive(Clone)]
pub struct SheetPatchServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<SheetPatchServer>,
}

impl SheetPatchServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let state = Arc::new(AppState::new(config)?);
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn run_stdio(self) -> Result<()> {
        let service = self
            .serve(stdio())
            .await
            .inspect_err(|error| tracing::error!("serving error: {:?}", error))?;
        service.waiting().await?;
        Ok(())
    }

    pub async fn run_http(self) -> Result<()> {
        use rmcp::transport::streamable_http_server::{
            StreamableHttpService, session::local::LocalSessionManager,
        };

        let bind = self.state.config.http_bind_address;
        let service = StreamableHttpService::new(
            move || Ok(self.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let router = axum::Router::new().nest_service("/mcp", service);
        let listener = tokio::net::TcpListener::bind(bind).await?;
        tracing::info!(address = %bind, "http transport listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        Ok(())
    }

    fn ensure_tool_enabled(&self, tool: &str) -> Result<()> {
        tracing::info!(tool = tool, "tool invocation requested");
        if self.state.config.is_tool_enabled(tool) {
            Ok(())
        } else {
            Err(ToolDisabledError::new(tool).into())
        }
    }

    async fn run_tool_with_timeout<T, F>(&self, tool: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        T: Serialize,
    {
        let request_id = crate::utils::make_short_random_id(8);
        tracing::debug!(tool = tool, request_id = %request_id, "tool started");
        let result = if let Some(timeout_duration) = self.state.config.tool_timeout() {
            match tokio::time::timeout(timeout_duration, fut).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "tool '{}' timed out after {}ms",
                    tool,
                    timeout_duration.as_millis()
                )),
            }
        } else {
            fut.await
        }?;

        self.ensure_response_size(tool, &result)?;
        tracing::debug!(tool = tool, request_id = %request_id, "tool finished");
        Ok(result)
    }

    fn ensure_response_size<T: Serialize>(&self, tool: &str, value: &T) -> Result<()> {
        let Some(limit) = self.state.config.max_response_bytes() else {
            return Ok(());
        };
        let payload = serde_json::to_vec(value)
            .map_err(|e| anyhow!("failed to serialize response for {}: {}", tool, e))?;
        if payload.len() > limit {
            return Err(ResponseTooLargeError::new(tool, payload.len(), limit).into());
        }
        Ok(())
    }

    /// Workbook IO is synchronous; keep it off the async workers.
    async fn run_patch_blocking(&self, request: PatchRequest) -> Result<PatchResult> {
        let orchestrator = self.state.orchestrator.clone();
        let request = self.resolve_patch_paths(request);
        tokio::task::spawn_blocking(move || orchestrator.run_patch(&request))
            .await
            .map_err(|e| anyhow!("patch task panicked: {e}"))
    }

    async fn run_make_blocking(&self, request: MakeRequest) -> Result<PatchResult> {
        let orchestrator = self.state.orchestrator.clone();
        let mut request = request;
        request.path = self.state.config.resolve_path(&request.path);
        tokio::task::spawn_blocking(move || orchestrator.run_make(&request))
            .await
            .map_err(|e| anyhow!("make task panicked: {e}"))
    }

    fn resolve_patch_paths(&self, mut request: PatchRequest) -> PatchRequest {
        request.path = self.state.config.resolve_path(&request.path);
        if let Some(out_dir) = request.out_dir.take() {
            request.out_dir = Some(self.state.config.resolve_path(out_dir));
        }
        request
    }
}

#[tool_router]
impl SheetPatchServer {
    #[tool(
        name = "patch_workbook",
        description = "Apply a validated batch of typed ops to an existing workbook. Atomic: one save at the end, or none on error."
    )]
    pub async fn patch_workbook(
        &self,
        Parameters(params): Parameters<PatchRequest>,
    ) -> Result<Json<PatchResult>, McpError> {
        self.ensure_tool_enabled("patch_workbook")
            .map_err(|e| to_mcp_error_for_tool("patch_workbook", e))?;
        self.run_tool_with_timeout("patch_workbook", self.run_patch_blocking(params))
            .await
            .map(Json)
            .map_err(|e| to_mcp_error_for_tool("patch_workbook", e))
    }

    #[tool(
        name = "make_workbook",
        description = "Create a new workbook with a seed sheet, then apply an optional batch of ops in place."
    )]
    pub async fn make_workbook(
        &self,
        Parameters(params): Parameters<MakeRequest>,
    ) -> Result<Json<PatchResult>, McpError> {
        self.ensure_tool_enabled("make_workbook")
            .map_err(|e| to_mcp_error_for_tool("make_workbook", e))?;
        self.run_tool_with_timeout("make_workbook", self.run_make_blocking(params))
            .await
            .map(Json)
            .map_err(|e| to_mcp_error_for_tool("make_workbook", e))
    }

    #[tool(
        name = "list_patch_ops",
        description = "List all supported op kinds with summaries, engine routing, and design-snapshot eligibility."
    )]
    pub async fn list_patch_ops(&self) -> Result<Json<OpCatalogResponse>, McpError> {
        self.ensure_tool_enabled("list_patch_ops")
            .map_err(|e| to_mcp_error_for_tool("list_patch_ops", e))?;
        self.run_tool_with_timeout("list_patch_ops", async { Ok(op_catalog()) })
            .await
            .map(Json)
            .map_err(|e| to_mcp_error_for_tool("list_patch_ops", e))
    }

    #[tool(
        name = "describe_patch_op",
        description = "Describe one op kind: required/optional fields, aliases, target rule, and a worked example."
    )]
    pub async fn describe_patch_op(
        &self,
        Parameters(params): Parameters<DescribePatchOpParams>,
    ) -> Result<Json<OpDescribeResponse>, McpError> {
        self.ensure_tool_enabled("describe_patch_op")
            .map_err(|e| to_mcp_error_for_tool("describe_patch_op", e))?;
        self.run_tool_with_timeout("describe_patch_op", async move {
            describe_op(&params.kind)
        })
        .await
        .map(Json)
        .map_err(|e| to_mcp_error_for_tool("describe_patch_op", e))
    }
}

fn op_catalog() -> OpCatalogResponse {
    registry::catalog()
}

fn describe_op(kind: &str) -> Result<OpDescribeResponse> {
    registry::describe(kind).map_err(|e| {
        anyhow::Error::new(
            InvalidParamsError::new("describe_patch_op", e.to_string()).with_path("kind"),
        )
    })
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for SheetPatchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(build_instructions(self.state.config.live_enabled)),
            ..ServerInfo::default()
        }
    }
}

fn to_mcp_error_for_tool(tool: &str, error: anyhow::Error) -> McpError {
    if error.is::<ToolDisabledError>() || error.is::<ResponseTooLargeError>() {
        return McpError::invalid_request(error.to_string(), None);
    }

    if let Some(inv) = error.downcast_ref::<InvalidParamsError>() {
        let example = tool_minimal_example(tool);
        let variants = tool_variants(tool, inv.message())
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let msg = format_invalid_params_message(
            tool,
            inv.message(),
            inv.path(),
            if variants.is_empty() {
                None
            } else {
                Some(&variants)
            },
            example,
        );
        return McpError::invalid_params(msg, None);
    }

    if let Some(serde_err) = error.downcast_ref::<serde_json::Error>() {
        let problem = serde_err.to_string();
        let path = infer_path_for_tool(tool, &problem);

        let mut variants = extract_expected_variants(&problem);
        if variants.is_empty()
            && let Some(extra) = tool_variants(tool, &problem)
        {
            variants = extra.into_iter().map(|s| s.to_string()).collect();
        }

        let example = tool_minimal_example(tool);
        let msg = format_invalid_params_message(
            tool,
            &problem,
            path.as_deref(),
            if variants.is_empty() {
                None
            } else {
                Some(&variants)
            },
            example,
        );
        return McpError::invalid_params(msg, None);
    }

    // Heuristic fallbacks for common user-caused shape/enum mistakes that may not
    // be typed as serde_json::Error (e.g., anyhow::bail! paths).
    let problem = error.to_string();
    if looks_like_invalid_params(&problem) {
        let path = infer_path_for_tool(tool, &problem);
        let variants = tool_variants(tool, &problem)
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let example = tool_minimal_example(tool);
        let msg = format_invalid_params_message(
            tool,
            &problem,
            path.as_deref(),
            if variants.is_empty() {
                None
            } else {
                Some(&variants)
            },
            example,
        );
        return McpError::invalid_params(msg, None);
    }

    McpError::internal_error(problem, None)
}

fn format_invalid_params_message(
    tool: &str,
    problem: &str,
    path: Option<&str>,
    variants: Option<&[String]>,
    example: Option<&'static str>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Invalid params for tool '{tool}': {problem}"));

    if let Some(path) = path {
        out.push_str(&format!("\npath: {path}"));
    }

    if let Some(variants) = variants
        && !variants.is_empty()
    {
        out.push_str("\nvalid variants: ");
        out.push_str(&variants.join(", "));
    }

    if let Some(example) = example {
        out.push_str("\nexample: ");
        out.push_str(example);
    }

    out
}

fn tool_minimal_example(tool: &str) -> Option<&'static str> {
    match tool {
        "patch_workbook" => Some(
            r#"{"path":"report.xlsx","ops":[{"kind":"set_value","sheet":"Sheet1","cell":"A1","value":42}]}"#,
        ),
        "make_workbook" => Some(
            r#"{"path":"new.xlsx","sheet_name":"Data","ops":[{"kind":"set_value","cell":"A1","value":"title"}]}"#,
        ),
        "describe_patch_op" => Some(r#"{"kind":"set_value"}"#),
        _ => None,
    }
}

fn infer_path_for_tool(tool: &str, problem: &str) -> Option<String> {
    let p = problem.to_ascii_lowercase();

    match tool {
        "patch_workbook" | "make_workbook" => {
            if p.contains("missing field `kind`")
                || p.contains("missing field kind")
                || p.contains("unknown operation kind")
            {
                return Some("ops[0].kind".to_string());
            }
            if p.contains("unknown variant") && p.contains("auto") && p.contains("live") {
                return Some("backend".to_string());
            }
            if p.contains("on_conflict") {
                return Some("on_conflict".to_string());
            }
            None
        }
        "describe_patch_op" => {
            if p.contains("kind") {
                return Some("kind".to_string());
            }
            None
        }
        _ => None,
    }
}

fn tool_variants(tool: &str, problem: &str) -> Option<Vec<&'static str>> {
    let p = problem.to_ascii_lowercase();

    match tool {
        "patch_workbook" | "make_workbook" | "describe_patch_op" => {
            if p.contains("unknown operation kind")
                || p.contains("missing field `kind`")
                || p.contains("missing field kind")
                || (p.contains("unknown variant") && p.contains("kind"))
            {
                return Some(registry::op_kind_names());
            }
            if p.contains("unknown variant") && p.contains("auto") && p.contains("live") {
                return Some(vec!["auto", "file", "live"]);
            }
            if p.contains("on_conflict") {
                return Some(vec!["overwrite", "skip", "rename"]);
            }
            None
        }
        _ => None,
    }
}

fn looks_like_invalid_params(problem: &str) -> bool {
    let p = problem.to_ascii_lowercase();

    // serde-driven shape/enum failures
    if p.contains("missing field")
        || p.contains("unknown field")
        || p.contains("unknown variant")
        || p.contains("did not match any variant")
        || p.contains("must be an object")
    {
        return true;
    }

    // hand-rolled validation errors from the normalizer
    if p.contains("unknown operation kind") {
        return true;
    }

    false
}

fn extract_expected_variants(problem: &str) -> Vec<String> {
    static EXPECTED_TAIL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"expected(?: one of)? (?P<tail>.*)$").expect("regex"));
    static BACKTICK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("regex"));

    let Some(caps) = EXPECTED_TAIL_RE.captures(problem) else {
        return Vec::new();
    };
    let tail = caps.name("tail").map(|m| m.as_str()).unwrap_or("");
    BACKTICK_RE
        .captures_iter(tail)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}


#[derive(Debug, Error)]
#[error("tool '{tool_name}' is disabled by server configuration")]
struct ToolDisabledError {
    tool_name: String,
}

impl ToolDisabledError {
    fn new(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Error)]
#[error(
    "tool '{tool_name}' response too large ({size} bytes > {limit} bytes); reduce request size or page results"
)]
struct ResponseTooLargeError {
    tool_name: String,
    size: usize,
    limit: usize,
}

impl ResponseTooLargeError {
    fn new(tool_name: &str, size: usize, limit: usize) -> Self {
        Self {
            tool_name: tool_name.to_ascii_lowercase(),
            size,
            limit,
        }
    }
}
