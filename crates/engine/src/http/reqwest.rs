use async_trait::async_trait;

use super::{HttpExecutor, Method, Request, Response, ResponseError, ResponseErrorKind};

pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl Default for ReqwestExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: Request) -> Result<Response, ResponseError> {
        let url = if request.params.is_empty() {
            reqwest::Url::parse(&request.url)
        } else {
            reqwest::Url::parse_with_params(&request.url, &request.params)
        }
        .map_err(|e| ResponseError {
            kind: ResponseErrorKind::BadRequest,
            status: None,
            message: format!("invalid url {}: {e}", request.url),
        })?;

        let mut builder = self.client.request(request.method.into(), url);

        for (key, value) in request.headers {
            builder = builder.header(key, value);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        map_response(response).await
    }
}

impl From<Method> for reqwest::Method {
    fn from(value: Method) -> Self {
        match value {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

async fn map_response(value: reqwest::Response) -> Result<Response, ResponseError> {
    let status = value.status().as_u16();
    let headers = value
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect::<Vec<_>>();

    let data = value
        .bytes()
        .await
        .map_err(|e| ResponseError {
            kind: ResponseErrorKind::BadResponse,
            status: Some(status),
            message: e.to_string(),
        })?
        .to_vec();

    Ok(Response {
        status,
        headers,
        data,
    })
}

impl From<reqwest::Error> for ResponseError {
    fn from(value: reqwest::Error) -> Self {
        let kind = if value.is_timeout() {
            ResponseErrorKind::Timeout
        } else if value.is_builder() {
            ResponseErrorKind::BadRequest
        } else {
            ResponseErrorKind::BadResponse
        };

        ResponseError {
            kind,
            status: value.status().map(|v| v.as_u16()),
            message: value.to_string(),
        }
    }
}
