#[cfg(test)]
mod tests {
    use crate::codec::{Base64JsonCodec, CodecError, StateCodec};
    use crate::parse::parse_form_document;

    fn token(password: Option<&str>) -> String {
        let doc = parse_form_document(r#"<static-state><properties state-handling="client"/></static-state>"#).unwrap();
        Base64JsonCodec::new().encode(&doc, password).unwrap()
    }

    #[test]
    fn test_signed_token_round_trips() {
        let codec = Base64JsonCodec::new();
        let signed = token(Some("secret"));
        let (payload, signature) = signed.split_once('.').unwrap();
        assert_eq!(payload, token(None));
        assert!(!signature.is_empty());

        assert_eq!(codec.verify(&signed, "secret"), Ok(()));
        let doc = codec.decode(&signed, Some("secret")).unwrap();
        assert_eq!(doc.name(doc.root()).map(|n| n.local.as_str()), Some("static-state"));
    }

    #[test]
    fn test_wrong_password_is_rejected() {
        let codec = Base64JsonCodec::new();
        let signed = token(Some("secret"));
        assert_eq!(codec.verify(&signed, "other"), Err(CodecError::BadSignature));
        assert_eq!(codec.decode(&signed, Some("other")).unwrap_err(), CodecError::BadSignature);
        assert_eq!(codec.decode(&signed, None).unwrap_err(), CodecError::UnexpectedSignature);
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = Base64JsonCodec::new();
        let signed = token(Some("secret"));
        let (_, signature) = signed.split_once('.').unwrap();
        let other = parse_form_document("<static-state><xf:input xmlns:xf=\"http://www.w3.org/2002/xforms\" id=\"evil\"/></static-state>").unwrap();
        let forged = format!("{}.{}", codec.encode(&other, None).unwrap(), signature);

        assert_eq!(codec.decode(&forged, Some("secret")).unwrap_err(), CodecError::BadSignature);
    }

    #[test]
    fn test_unsigned_or_garbled_signature_fails_verification() {
        let codec = Base64JsonCodec::new();
        assert_eq!(codec.verify(&token(None), "secret"), Err(CodecError::BadSignature));
        assert_eq!(
            codec.verify(&format!("{}.not*base64", token(None)), "secret"),
            Err(CodecError::BadSignature)
        );
    }
}
