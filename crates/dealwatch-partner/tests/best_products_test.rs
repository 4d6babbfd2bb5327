//! Integration tests for the best-products fetch against a mock partner API.

use dealwatch_partner::{PartnerClient, PartnerConfig, PartnerError, BEST_CATEGORIES_PATH};
use serde_json::json;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> PartnerClient {
    PartnerClient::new(PartnerConfig {
        base_url: server.uri(),
        access_key: "test-key".into(),
        secret_key: "test-secret".into(),
        ..Default::default()
    })
    .expect("client")
}

#[tokio::test]
async fn fetch_parses_products_and_signs_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{BEST_CATEGORIES_PATH}1016")))
        .and(query_param("limit", "100"))
        .and(query_param("subId", "digitalbest"))
        .and(query_param("imageSize", "512x512"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rCode": "0",
            "rMessage": "",
            "data": [
                {
                    "productId": 1,
                    "productName": "USB-C Hub",
                    "productPrice": 25900,
                    "categoryName": "Electronics",
                    "isRocket": true,
                    "isFreeShipping": false,
                    "productImage": "https://img.example.com/1.jpg",
                    "productUrl": "https://shop.example.com/1"
                },
                { "productId": 2, "productPrice": 9900 }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let products = client_for(&server)
        .fetch_best_products("1016", 100)
        .await
        .expect("fetch");

    assert_eq!(products.len(), 2);
    assert_eq!(products[0].product_id, 1);
    assert_eq!(products[0].product_price, 25900);
    assert!(products[0].is_rocket);
    assert_eq!(products[1].product_name, "");
}

#[tokio::test]
async fn non_success_response_code_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rCode": "401",
            "rMessage": "invalid signature",
            "data": []
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_best_products("1016", 100)
        .await
        .expect_err("should fail");
    match err {
        PartnerError::Api { code, message } => {
            assert_eq!(code, "401");
            assert_eq!(message, "invalid signature");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn http_error_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_best_products("1016", 100)
        .await
        .expect_err("should fail");
    assert!(matches!(err, PartnerError::HttpStatus { status: 500, .. }));
}
