use super::{ApiReply, Portal, SUCCESS_CODE};
use crate::config::PortalConfig;
use crate::error::PortalError;
use crate::model::{CourseEntry, SeatStatus};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use scraper::{Html, Selector};
use serde::Deserialize;

/// HTTP client for the portal's JSON endpoints.
#[derive(Debug, Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    status_url: String,
    enroll_url: String,
    courses_url: String,
    blocks_url: String,
}

#[derive(Deserialize)]
struct CourseList {
    #[serde(default)]
    courses: Vec<CourseEntry>,
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl PortalClient {
    pub fn new(cfg: &PortalConfig) -> Result<Self, PortalError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cfg.cookie_header() {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| PortalError::decode(format!("invalid cookie value: {e}")))?;
            headers.insert(COOKIE, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(&cfg.user_agent)
            .timeout(cfg.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
            status_url: join_url(&cfg.base_url, &cfg.endpoints.status_path),
            enroll_url: join_url(&cfg.base_url, &cfg.endpoints.enroll_path),
            courses_url: join_url(&cfg.base_url, &cfg.endpoints.courses_path),
            blocks_url: join_url(&cfg.base_url, &cfg.endpoints.blocks_path),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_body(resp: reqwest::Response) -> Result<String, PortalError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(PortalError::Status {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.text().await?)
    }

    async fn read_envelope(
        resp: reqwest::Response,
    ) -> Result<ApiReply<serde_json::Value>, PortalError> {
        let body = Self::read_body(resp).await?;
        serde_json::from_str(&body).map_err(PortalError::decode)
    }

    async fn post_section(
        &self,
        url: &str,
        section_id: &str,
        execution_id: &str,
    ) -> Result<ApiReply<serde_json::Value>, PortalError> {
        let resp = self
            .http
            .post(url)
            .form(&[("class_id", section_id), ("do_id", execution_id)])
            .send()
            .await?;
        Self::read_envelope(resp).await
    }

    /// Courses offered in an enrollment block for the given school year/term.
    pub async fn list_block_courses(
        &self,
        year: i32,
        term: u8,
        block: u32,
    ) -> Result<Vec<CourseEntry>, PortalError> {
        let resp = self
            .http
            .get(&self.courses_url)
            .query(&[
                ("year", year.to_string()),
                ("term", term.to_string()),
                ("block", block.to_string()),
            ])
            .send()
            .await?;
        let data = Self::read_envelope(resp).await?.into_data()?;
        let list: CourseList = serde_json::from_value(data).map_err(PortalError::decode)?;
        Ok(list.courses)
    }

    /// Enrollment block names, in block-number order (the first name is block 1).
    pub async fn list_block_names(&self) -> Result<Vec<String>, PortalError> {
        let resp = self.http.get(&self.blocks_url).send().await?;
        let html = Self::read_body(resp).await?;
        parse_block_tabs(&html)
    }
}

/// Texts of the page's `a[role='tab']` links, blanks skipped.
fn parse_block_tabs(html: &str) -> Result<Vec<String>, PortalError> {
    let selector = Selector::parse("a[role='tab']")
        .map_err(|e| PortalError::decode(format!("tab selector: {e:?}")))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .map(|tab| tab.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
        .collect())
}

#[async_trait]
impl Portal for PortalClient {
    async fn query_status(
        &self,
        section_id: &str,
        execution_id: &str,
    ) -> Result<ApiReply<SeatStatus>, PortalError> {
        let raw = self
            .post_section(&self.status_url, section_id, execution_id)
            .await?;
        if raw.code != SUCCESS_CODE {
            return Ok(ApiReply::failed(raw.code, raw.message));
        }
        let data = raw
            .data
            .ok_or_else(|| PortalError::decode("status reply without data"))?;
        let seats: SeatStatus = serde_json::from_value(data).map_err(PortalError::decode)?;
        Ok(ApiReply {
            message: raw.message,
            ..ApiReply::ok(seats)
        })
    }

    async fn attempt_enroll(
        &self,
        section_id: &str,
        execution_id: &str,
    ) -> Result<ApiReply<()>, PortalError> {
        let raw = self
            .post_section(&self.enroll_url, section_id, execution_id)
            .await?;
        Ok(ApiReply {
            code: raw.code,
            message: raw.message,
            data: Some(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> PortalClient {
        let mut cookies = BTreeMap::new();
        cookies.insert("JSESSIONID".to_string(), "s3ss".to_string());
        let cfg = PortalConfig {
            base_url: server.uri(),
            cookies,
            ..PortalConfig::default()
        };
        PortalClient::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn status_query_sends_ids_and_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/course/status"))
            .and(header("cookie", "JSESSIONID=s3ss"))
            .and(body_string_contains("class_id=C1"))
            .and(body_string_contains("do_id=D1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 1000,
                "msg": "ok",
                "data": {"capacity": 30, "selected_number": 29}
            })))
            .mount(&server)
            .await;

        let reply = client_for(&server).query_status("C1", "D1").await.unwrap();
        assert!(reply.is_success());
        assert_eq!(
            reply.data,
            Some(SeatStatus {
                capacity: 30,
                enrolled_count: 29
            })
        );
    }

    #[tokio::test]
    async fn non_success_code_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/course/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": 999, "msg": "busy"})),
            )
            .mount(&server)
            .await;

        let reply = client_for(&server).query_status("C1", "D1").await.unwrap();
        assert_eq!(reply.code, 999);
        assert_eq!(reply.message, "busy");
    }

    #[tokio::test]
    async fn malformed_bodies_and_http_errors_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/course/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/course/select"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(matches!(
            client.query_status("C1", "D1").await,
            Err(PortalError::Decode(_))
        ));
        assert!(matches!(
            client.attempt_enroll("C1", "D1").await,
            Err(PortalError::Status { status: 502, .. })
        ));
    }

    #[tokio::test]
    async fn enroll_reports_code_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/course/select"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": 1002, "msg": "seat taken"})),
            )
            .mount(&server)
            .await;

        let reply = client_for(&server).attempt_enroll("C1", "D1").await.unwrap();
        assert!(!reply.is_success());
        assert_eq!(reply.message, "seat taken");
    }

    #[tokio::test]
    async fn lists_block_courses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/course/block"))
            .and(query_param("year", "2024"))
            .and(query_param("term", "1"))
            .and(query_param("block", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 1000,
                "msg": "",
                "data": {"courses": [
                    {"title": "Linear Algebra", "teacher": "Wang", "class_id": "C9", "do_id": "D9"}
                ]}
            })))
            .mount(&server)
            .await;

        let courses = client_for(&server)
            .list_block_courses(2024, 1, 3)
            .await
            .unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(
            courses[0].to_target(),
            crate::model::GrabTarget::new("C9", "D9", "Linear Algebra")
        );
    }
    #[tokio::test]
    async fn lists_block_names_from_tab_links() {
        let server = MockServer::start().await;
        let page = r##"<html><body><ul class="nav nav-tabs">
            <li><a role="tab" href="#b1">General Electives</a></li>
            <li><a role="tab" href="#b2"> Physical
                Education </a></li>
            <li><a role="tab" href="#b3">   </a></li>
            <li><a href="#x">Not a tab</a></li>
            <li><a role="tab" href="#b4"><span>Major</span> Courses</a></li>
        </ul></body></html>"##;
        Mock::given(method("GET"))
            .and(path("/xsxk/zzxkyzb_cxZzxkYzbIndex.html"))
            .and(query_param("gnmkdm", "N253512"))
            .and(header("cookie", "JSESSIONID=s3ss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;

        let names = client_for(&server).list_block_names().await.unwrap();
        assert_eq!(
            names,
            vec!["General Electives", "Physical Education", "Major Courses"]
        );
    }

    #[tokio::test]
    async fn block_page_outside_enrollment_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xsxk/zzxkyzb_cxZzxkYzbIndex.html"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(matches!(
            client_for(&server).list_block_names().await,
            Err(PortalError::Status { status: 404, .. })
        ));
    }
}
