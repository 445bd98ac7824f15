// rpc/src/server.rs
use crate::{
    CallContractRequest, DeployContractRequest, EstimateGasRequest, RpcError, RpcErrorResponse, RpcMethods,
    RpcRequest, RpcResponse, RpcResult,
};
use hyper::header::{HeaderValue, ORIGIN};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub listen_addr: SocketAddr,
    pub cors_origins: Vec<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8545)),
            cors_origins: vec!["*".to_string()],
        }
    }
}

pub struct RpcServer {
    config: RpcConfig,
    methods: Arc<RpcMethods>,
}

impl RpcServer {
    pub fn new(config: RpcConfig, methods: RpcMethods) -> Self {
        Self {
            config,
            methods: Arc::new(methods),
        }
    }

    pub async fn start(self: Arc<Self>) -> RpcResult<()> {
        tracing::info!("Starting RPC server on {}", self.config.listen_addr);

        let value = self.clone();
        let make_svc = make_service_fn(move |_| {
            let server = value.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                }))
            }
        });

        let server = Server::try_bind(&self.config.listen_addr)
            .map_err(|e| RpcError::ServerError(e.to_string()))?
            .serve(make_svc);

        tracing::info!("RPC server listening on {}", self.config.listen_addr);

        server.await
            .map_err(|e| RpcError::ServerError(e.to_string()))?;

        Ok(())
    }

    async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
        let origin = self.allowed_origin(req.headers().get(ORIGIN));

        // Handle OPTIONS
        if req.method() == Method::OPTIONS {
            return Ok(self.respond(StatusCode::OK, Body::empty(), origin));
        }

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let body_bytes = hyper::body::to_bytes(req.into_body()).await?;

        let (status, json) = match (&method, path.as_str()) {
            (&Method::POST, "/") => (StatusCode::OK, self.process_json_rpc(&body_bytes).await),
            (&Method::POST, "/deploy_contract") => {
                rest(parse_body::<DeployContractRequest>(&body_bytes), |r| self.methods.deploy_contract(r)).await
            }
            (&Method::POST, "/call_contract") => {
                rest(parse_body::<CallContractRequest>(&body_bytes), |r| self.methods.call_contract(r)).await
            }
            (&Method::POST, "/estimate_gas") => {
                rest(parse_body::<EstimateGasRequest>(&body_bytes), |r| async move {
                    let gas_estimate = self.methods.estimate_gas(r).await?;
                    Ok::<_, RpcError>(json!({ "gas_estimate": gas_estimate }))
                })
                .await
            }
            (&Method::GET, "/get_contract") => {
                let address = query_param(query.as_deref(), "address")
                    .ok_or_else(|| RpcError::InvalidParams("missing 'address' query parameter".into()));
                rest(address, |a| async move { self.methods.get_contract(&a).await }).await
            }
            (&Method::GET, "/get_contracts") => {
                rest(Ok(()), |_| async move {
                    let contracts = self.methods.get_contracts().await?;
                    Ok::<_, RpcError>(json!({ "contracts": contracts }))
                })
                .await
            }
            (_, "/") => (StatusCode::METHOD_NOT_ALLOWED, json!({"error": "Method not allowed"}).to_string()),
            _ => (StatusCode::NOT_FOUND, json!({"error": format!("No route for {}", path)}).to_string()),
        };

        Ok(self.respond(status, Body::from(json), origin))
    }

    async fn process_json_rpc(&self, body: &[u8]) -> String {
        let response = match serde_json::from_slice::<Value>(body) {
            Err(_) => error_response(&RpcError::ParseError, Value::Null),
            Ok(value) => match serde_json::from_value::<RpcRequest>(value) {
                Ok(request) if request.jsonrpc == "2.0" => self.process_request(request).await,
                Ok(request) => error_response(&RpcError::InvalidRequest, request.id),
                Err(_) => error_response(&RpcError::InvalidRequest, Value::Null),
            },
        };
        serde_json::to_string(&response).unwrap_or_default()
    }

    async fn process_request(&self, request: RpcRequest) -> RpcResponse {
        match self.methods.handle(&request.method, request.params).await {
            Ok(result) => RpcResponse {
                jsonrpc: "2.0".to_string(),
                result: Some(result),
                error: None,
                id: request.id,
            },
            Err(error) => {
                tracing::debug!("RPC {} failed: {}", request.method, error);
                error_response(&error, request.id)
            }
        }
    }

    fn allowed_origin(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        if self.config.cors_origins.iter().any(|o| o == "*") {
            return Some(HeaderValue::from_static("*"));
        }
        let origin = origin?;
        let text = origin.to_str().ok()?;
        self.config
            .cors_origins
            .iter()
            .any(|allowed| allowed == text)
            .then(|| origin.clone())
    }

    fn respond(&self, status: StatusCode, body: Body, origin: Option<HeaderValue>) -> Response<Body> {
        // CORS headers
        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("Access-Control-Allow-Methods", HeaderValue::from_static("GET, POST, OPTIONS"));
        headers.insert("Access-Control-Allow-Headers", HeaderValue::from_static("Content-Type"));
        if let Some(origin) = origin {
            headers.insert("Access-Control-Allow-Origin", origin);
        }
        response
    }
}

fn error_response(error: &RpcError, id: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0".to_string(),
        result: None,
        error: Some(RpcErrorResponse {
            code: error.code(),
            message: error.to_string(),
            data: error.data(),
        }),
        id,
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> RpcResult<T> {
    serde_json::from_slice(body).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Run a REST handler and render its outcome as `(status, json)`
async fn rest<A, T, F, Fut>(input: RpcResult<A>, handler: F) -> (StatusCode, String)
where
    F: FnOnce(A) -> Fut,
    Fut: std::future::Future<Output = RpcResult<T>>,
    T: Serialize,
{
    let outcome = match input {
        Ok(input) => handler(input).await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(value) => (
            StatusCode::OK,
            serde_json::to_string(&value).unwrap_or_default(),
        ),
        Err(error) => {
            let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = json!({
                "success": false,
                "error": { "kind": error.kind(), "message": error.to_string() },
            });
            (status, body.to_string())
        }
    }
}
