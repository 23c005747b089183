//! Verify call building, envelope parsing and landing classification against
//! JSON test vectors stored in `test-vectors/`.
//!
//! Bodies are compared as decoded pair lists and results as parsed JSON, so
//! neither escaping style nor key order in the vector files matters.

use serde_json::Value;
use url::form_urlencoded;
use vk_core::{CallDispatcher, Error, HttpMethod, HttpResponse, Landing, ParameterSet, Session};

fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        other => panic!("unknown method: {other}"),
    }
}

fn decode(body: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(body).into_owned().collect()
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[test]
fn call_test_vectors() {
    let raw = include_str!("../../test-vectors/calls.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let dispatcher = CallDispatcher::new(vectors["api_base"].as_str().unwrap());
    let version = vectors["api_version"].as_str().unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();

        let mut params = ParameterSet::new();
        for pair in case["params"].as_array().unwrap() {
            params.set(pair[0].as_str().unwrap(), pair[1].as_str().unwrap());
        }
        let session = Session::from_token(case["access_token"].as_str().unwrap(), 1);

        // Verify build
        let expected_req = &case["expected_request"];
        let req = dispatcher
            .build_call(case["method"].as_str().unwrap(), &params, &session, version)
            .unwrap();
        assert_eq!(req.method, parse_method(expected_req["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.url, expected_req["url"].as_str().unwrap(), "{name}: url");
        assert_eq!(
            decode(req.body.as_deref().unwrap()),
            decode(expected_req["body"].as_str().unwrap().as_bytes()),
            "{name}: body"
        );
        assert_eq!(req.body_text(), expected_req["body"].as_str().unwrap(), "{name}: body bytes");

        // Verify parse
        let sim = &case["simulated_response"];
        let response = HttpResponse {
            status: sim["status"].as_u64().unwrap() as u16,
            headers: Vec::new(),
            body: sim["body"].as_str().unwrap().as_bytes().to_vec(),
            final_url: req.url.clone(),
        };
        let result = dispatcher.parse_call(&response);

        match case.get("expected_error") {
            Some(expected) => match result {
                Err(Error::Api(api)) => {
                    assert_eq!(api.code, expected["code"].as_i64().unwrap(), "{name}: code");
                    assert_eq!(api.message, expected["message"].as_str().unwrap(), "{name}: message");
                }
                other => panic!("{name}: expected ApiError, got {other:?}"),
            },
            None => {
                let parsed = result.unwrap_or_else(|e| panic!("{name}: {e}"));
                assert_eq!(parsed.value(), &case["expected_result"], "{name}: parsed result");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Landings
// ---------------------------------------------------------------------------

#[test]
fn landing_test_vectors() {
    let raw = include_str!("../../test-vectors/landings.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let expected = &case["expected"];
        let landing = Landing::from_url(case["url"].as_str().unwrap()).unwrap();

        let want = match expected["kind"].as_str().unwrap() {
            "granted" => Landing::Granted {
                access_token: expected["access_token"].as_str().unwrap().to_string(),
                user_id: expected["user_id"].as_i64().unwrap(),
                expires_in: expected["expires_in"].as_i64().unwrap(),
            },
            "captcha" => Landing::Captcha {
                sid: expected["sid"].as_i64().unwrap(),
            },
            "denied" => Landing::Denied {
                error: expected["error"].as_str().unwrap().to_string(),
                description: expected["description"].as_str().map(str::to_string),
            },
            "page" => Landing::Page,
            other => panic!("{name}: unknown kind {other}"),
        };
        assert_eq!(landing, want, "{name}");
    }
}
