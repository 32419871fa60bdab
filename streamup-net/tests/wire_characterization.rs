//! Characterization tests for the HTTP wire protocol
//! These pin the URL and body formats shared by server and client

use hyper::Method;
use proptest::prelude::*;
use streamup_core::*;
use streamup_net::*;

fn split(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri, None),
    }
}

/// Every route survives being rendered to a URL and parsed back
#[test]
fn wire_routes_resolve_from_their_own_urls() {
    let target = Target::new("logs.example", "2024/06/app log.txt").unwrap();
    let upload_id = UploadId::generate();

    let routes = vec![
        Route::Health,
        Route::CreateUpload { target: target.clone() },
        Route::UploadPart { target: target.clone(), upload_id: upload_id.clone(), part_number: 10_000 },
        Route::ListParts { target: target.clone(), upload_id: upload_id.clone() },
        Route::CompleteUpload { target: target.clone(), upload_id: upload_id.clone() },
        Route::AbortUpload { target: target.clone(), upload_id },
        Route::GetObject { target: target.clone() },
        Route::DeleteObject { target },
    ];

    for route in routes {
        let uri = route.path_and_query();
        let (path, query) = split(&uri);
        let parsed = Route::parse(&route.method(), path, query).unwrap();
        assert_eq!(parsed, route, "route mismatch for {}", uri);
    }
}

/// Query parameter order on the wire does not matter
#[test]
fn wire_query_order_is_irrelevant() {
    let a = Route::parse(&Method::PUT, "/v1/b/k", Some("uploadId=x&partNumber=2")).unwrap();
    let b = Route::parse(&Method::PUT, "/v1/b/k", Some("partNumber=2&uploadId=x")).unwrap();
    assert_eq!(a, b);
}

/// Unknown JSON fields from newer servers are ignored
#[test]
fn wire_bodies_ignore_unknown_fields() {
    let body = br#"{"upload_id":"01HZX","region":"local","extra":[1,2,3]}"#;
    let parsed: CreateUploadResponse = serde_json::from_slice(body).unwrap();
    assert_eq!(parsed.upload_id.as_str(), "01HZX");

    let body = br#"{"etag":"abc-2","size":10,"part_count":2,"location":"/v1/b/k"}"#;
    let parsed: CompleteUploadResponse = serde_json::from_slice(body).unwrap();
    assert_eq!(parsed.part_count, 2);
}

/// A missing upload id in a create response is detectable
#[test]
fn wire_empty_upload_id_is_detectable() {
    let parsed: CreateUploadResponse = serde_json::from_slice(br#"{"upload_id":""}"#).unwrap();
    assert!(parsed.upload_id.is_empty());

    assert!(serde_json::from_slice::<CreateUploadResponse>(br#"{}"#).is_err());
}

/// Signed query parameters match what the server rebuilds from the URL
#[test]
fn wire_query_params_match_parsed_query() {
    let route = Route::UploadPart {
        target: Target::new("b", "k").unwrap(),
        upload_id: UploadId::new("u-1"),
        part_number: 4,
    };
    let uri = route.path_and_query();
    let (_, query) = split(&uri);

    let parsed = parse_query(query.unwrap()).unwrap();
    let expected: Vec<(String, String)> = route
        .query_params()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    assert_eq!(parsed.into_iter().collect::<Vec<_>>(), expected);
}

proptest! {
    #[test]
    fn props_any_valid_key_survives_encoding(key in "\\PC{1,80}") {
        prop_assume!(Key::new(&key).is_ok());
        let target = Target::new("bucket", &key).unwrap();

        let route = Route::GetObject { target: target.clone() };
        let uri = route.path_and_query();
        let (path, query) = split(&uri);

        prop_assert!(uri.is_ascii());
        prop_assert_eq!(Route::parse(&Method::GET, path, query).unwrap(), route);
    }
}
