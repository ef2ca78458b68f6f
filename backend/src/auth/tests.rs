use super::*;
use axum::http::Request;
use jsonwebtoken::{EncodingKey, Header, encode};

const SECRET: &str = "supersecretjwtsecretforunittesting123";
const ACCOUNT: &str = "123e4567-e89b-12d3-a456-426614174000";

fn verifier() -> JwtVerifier {
    JwtVerifier::new(&IdentityProvider {
        jwt_secret: SECRET.to_string(),
        jwt_audience: "authenticated".to_string(),
    })
}

fn token(sub: &str, aud: &str, exp: usize, secret: &str) -> String {
    let claims = IdentityClaims {
        sub: sub.to_string(),
        email: Some("test@example.com".to_string()),
        aud: aud.to_string(),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[test]
fn test_verify_valid_token() {
    let user = verifier()
        .verify(&token(ACCOUNT, "authenticated", 9999999999, SECRET))
        .expect("Valid token should pass");

    assert_eq!(user.account_id.to_string(), ACCOUNT);
    assert_eq!(user.email.as_deref(), Some("test@example.com"));
}

#[test]
fn test_verify_expired_token() {
    let result = verifier().verify(&token(ACCOUNT, "authenticated", 1, SECRET));

    assert!(matches!(result, Err(AuthError::InvalidToken(_))));
}

#[test]
fn test_verify_wrong_audience() {
    let result = verifier().verify(&token(ACCOUNT, "service_role", 9999999999, SECRET));

    assert!(matches!(result, Err(AuthError::InvalidToken(_))));
}

#[test]
fn test_verify_wrong_secret() {
    let result = verifier().verify(&token(
        ACCOUNT,
        "authenticated",
        9999999999,
        "anothersecretthatdoesnotmatch12345",
    ));

    assert!(matches!(result, Err(AuthError::InvalidToken(_))));
}

#[test]
fn test_verify_non_uuid_subject() {
    let result = verifier().verify(&token("not-a-uuid", "authenticated", 9999999999, SECRET));

    assert!(matches!(result, Err(AuthError::InvalidSubject)));
}

#[tokio::test]
async fn test_extractor_reads_bearer_token() {
    let request = Request::builder()
        .header(
            AUTHORIZATION,
            format!("Bearer {}", token(ACCOUNT, "authenticated", 9999999999, SECRET)),
        )
        .extension(Arc::new(verifier()))
        .body(())
        .unwrap();
    let (mut parts, _) = request.into_parts();

    let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();

    assert_eq!(user.account_id.to_string(), ACCOUNT);
}

#[tokio::test]
async fn test_extractor_rejects_missing_header() {
    let request = Request::builder()
        .extension(Arc::new(verifier()))
        .body(())
        .unwrap();
    let (mut parts, _) = request.into_parts();

    let (status, _) = AuthUser::from_request_parts(&mut parts, &())
        .await
        .unwrap_err();

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
