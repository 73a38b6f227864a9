use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, Url,
};

use crate::{
    multipart::{MultipartPlan, ProducerSlot},
    Attachments, HttpError, Params, Result,
};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Explicitly configured request body. Only the first setter takes effect.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum BodySource {
    #[default]
    Unset,
    Raw(Bytes),
    Json(Bytes),
    Xml(Bytes),
}

impl BodySource {
    pub(crate) fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Raw(_) => "raw",
            Self::Json(_) => "json",
            Self::Xml(_) => "xml",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum PreparedBody {
    Empty,
    Bytes(Bytes),
    Multipart(MultipartPlan),
}

/// Final URL, headers and body recipe of a request.
///
/// Kept separate from `reqwest::Request` so every retry attempt gets a fresh
/// body, including a fresh multipart producer.
#[derive(Clone, Debug)]
pub(crate) struct Prepared {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: PreparedBody,
}

impl Prepared {
    pub(crate) fn build_request(&self) -> Result<(reqwest::Request, Option<ProducerSlot>)> {
        let mut request = reqwest::Request::new(self.method.clone(), self.url.clone());
        *request.headers_mut() = self.headers.clone();
        let slot = match &self.body {
            PreparedBody::Empty => None,
            PreparedBody::Bytes(bytes) => {
                *request.body_mut() = Some(reqwest::Body::from(bytes.clone()));
                None
            }
            PreparedBody::Multipart(plan) => {
                let multipart = plan.spawn_body()?;
                set_content_type(request.headers_mut(), &multipart.content_type)?;
                *request.body_mut() = Some(multipart.body);
                Some(multipart.slot)
            }
        };
        Ok((request, slot))
    }
}

/// Turns accumulated builder state into a request recipe.
///
/// GET parameters go to the query string. POST, PUT, PATCH and DELETE
/// without an explicit body send attachments as multipart, else parameters
/// as a urlencoded form.
pub(crate) fn prepare(
    method: &Method,
    url: &str,
    mut headers: HeaderMap,
    params: &Params,
    attachments: &Attachments,
    source: &BodySource,
) -> Result<Prepared> {
    let query = params.serialize()?;
    let mut target = url.to_owned();
    let mut body = PreparedBody::Empty;

    if *method == Method::GET && !query.is_empty() {
        append_query(&mut target, &query);
    }

    match source {
        BodySource::Raw(bytes) => body = PreparedBody::Bytes(bytes.clone()),
        BodySource::Json(bytes) => {
            default_content_type(&mut headers, "application/json");
            body = PreparedBody::Bytes(bytes.clone());
        }
        BodySource::Xml(bytes) => {
            default_content_type(&mut headers, "application/xml");
            body = PreparedBody::Bytes(bytes.clone());
        }
        BodySource::Unset if carries_form(method) => {
            if !attachments.is_empty() {
                body = PreparedBody::Multipart(MultipartPlan::new(attachments, params));
            } else if !query.is_empty() {
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(FORM_CONTENT_TYPE),
                );
                body = PreparedBody::Bytes(Bytes::from(query));
            }
        }
        BodySource::Unset => {}
    }

    let url = Url::parse(&target).map_err(|err| HttpError::invalid_url(&target, err))?;

    Ok(Prepared {
        method: method.clone(),
        url,
        headers,
        body,
    })
}

fn carries_form(method: &Method) -> bool {
    [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(method)
}

fn append_query(url: &mut String, query: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(query);
}

fn default_content_type(headers: &mut HeaderMap, value: &'static str) {
    headers
        .entry(header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static(value));
}

fn set_content_type(headers: &mut HeaderMap, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|err| HttpError::Encode(format!("invalid content type '{value}': {err}")))?;
    headers.insert(header::CONTENT_TYPE, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use reqwest::{
        header::{self, HeaderMap, HeaderValue},
        Method,
    };

    use super::{prepare, BodySource, PreparedBody};
    use crate::{Attachments, ErrorKind, Params};

    fn params() -> Params {
        [("a", "1"), ("b", "2")].into_iter().collect()
    }

    fn bytes_of(body: &PreparedBody) -> &[u8] {
        match body {
            PreparedBody::Bytes(bytes) => bytes,
            other => panic!("expected bytes body, got {other:?}"),
        }
    }

    #[test]
    fn get_appends_query_string() {
        let prepared = prepare(
            &Method::GET,
            "http://x/y",
            HeaderMap::new(),
            &params(),
            &Attachments::new(),
            &BodySource::Unset,
        )
        .expect("must prepare");

        assert_eq!(prepared.url.as_str(), "http://x/y?a=1&b=2");
        assert!(matches!(prepared.body, PreparedBody::Empty));
    }

    #[test]
    fn get_respects_existing_query() {
        let prepared = prepare(
            &Method::GET,
            "http://x/y?z=0",
            HeaderMap::new(),
            &params(),
            &Attachments::new(),
            &BodySource::Unset,
        )
        .expect("must prepare");

        assert_eq!(prepared.url.as_str(), "http://x/y?z=0&a=1&b=2");
    }

    #[test]
    fn post_encodes_form_body() {
        let prepared = prepare(
            &Method::POST,
            "http://x/y",
            HeaderMap::new(),
            &params(),
            &Attachments::new(),
            &BodySource::Unset,
        )
        .expect("must prepare");

        assert_eq!(prepared.url.as_str(), "http://x/y");
        assert_eq!(bytes_of(&prepared.body), b"a=1&b=2");
        assert_eq!(
            prepared.headers[header::CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn post_without_params_has_no_body() {
        let prepared = prepare(
            &Method::DELETE,
            "http://x/y",
            HeaderMap::new(),
            &Params::new(),
            &Attachments::new(),
            &BodySource::Unset,
        )
        .expect("must prepare");

        assert!(matches!(prepared.body, PreparedBody::Empty));
        assert!(prepared.headers.get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn attachments_switch_to_multipart() {
        let mut attachments = Attachments::new();
        attachments.insert("file", "Cargo.toml");
        let prepared = prepare(
            &Method::PUT,
            "http://x/y",
            HeaderMap::new(),
            &params(),
            &attachments,
            &BodySource::Unset,
        )
        .expect("must prepare");

        assert!(matches!(prepared.body, PreparedBody::Multipart(_)));
        let (request, slot) = prepared.build_request().expect("must build");
        let content_type = request.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        assert!(slot.is_some());
    }

    #[test]
    fn explicit_json_body_beats_params() {
        let prepared = prepare(
            &Method::POST,
            "http://x/y",
            HeaderMap::new(),
            &params(),
            &Attachments::new(),
            &BodySource::Json(Bytes::from_static(br#"{"k":"v"}"#)),
        )
        .expect("must prepare");

        assert_eq!(bytes_of(&prepared.body), br#"{"k":"v"}"#);
        assert_eq!(prepared.headers[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn explicit_content_type_is_kept_for_xml() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/xml; charset=utf-8"),
        );
        let prepared = prepare(
            &Method::POST,
            "http://x/y",
            headers,
            &Params::new(),
            &Attachments::new(),
            &BodySource::Xml(Bytes::from_static(b"<a/>")),
        )
        .expect("must prepare");

        assert_eq!(
            prepared.headers[header::CONTENT_TYPE],
            "text/xml; charset=utf-8"
        );
    }

    #[test]
    fn unparseable_url_is_rejected() {
        let err = prepare(
            &Method::GET,
            "not a url",
            HeaderMap::new(),
            &Params::new(),
            &Attachments::new(),
            &BodySource::Unset,
        )
        .expect_err("must fail");

        assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    }
}
