use crate::server::ServerError;
use axum::extract::{FromRequest, Multipart, Request};
use snapgram_common::media::Upload;
use std::collections::HashMap;

/// A fully read `multipart/form-data` body: text fields by name plus uploaded files.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: Vec<(String, Upload)>,
}

impl MultipartForm {
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn required_text(&self, name: &'static str) -> Result<&str, ServerError> {
        self.text(name).ok_or(ServerError::MissingField(name))
    }

    /// Removes and returns every file uploaded under `name`, in form order.
    pub fn take_files(&mut self, name: &str) -> Vec<Upload> {
        let (taken, kept) = std::mem::take(&mut self.files)
            .into_iter()
            .partition::<Vec<_>, _>(|(field, _)| field == name);
        self.files = kept;

        taken.into_iter().map(|(_, upload)| upload).collect()
    }
}

impl<S> FromRequest<S> for MultipartForm
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut multipart = Multipart::from_request(request, state).await?;
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            if let Some(file_name) = field.file_name().map(str::to_owned) {
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await?;

                // Browsers send an empty part for a file input left blank.
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }

                let upload = Upload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                };
                form.files.push((name, upload));
            } else {
                let text = field.text().await?;
                form.fields.insert(name, text);
            }
        }

        Ok(form)
    }
}


#[cfg(test)]
mod tests {
    use crate::server::{
        ServerError,
        form::{MultipartForm, test_request::multipart_request},
    };
    use axum::{body::Body, extract::FromRequest, http::Request};

    #[tokio::test]
    async fn reads_fields_and_files() {
        let request = multipart_request(&[
            ("caption", None, "Evening #sunset"),
            ("image", Some("a.jpg"), "first"),
            ("avatar", Some("me.jpg"), "face"),
            ("image", Some("b.jpg"), "second"),
            ("image", Some(""), ""),
        ]);

        let mut form = MultipartForm::from_request(request, &()).await.unwrap();

        assert_eq!(form.text("caption"), Some("Evening #sunset"));
        assert!(matches!(
            form.required_text("bio"),
            Err(ServerError::MissingField("bio"))
        ));

        let images = form.take_files("image");
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].file_name, "a.jpg");
        assert_eq!(images[1].bytes, b"second");
        assert_eq!(images[1].content_type.as_deref(), Some("image/jpeg"));

        assert!(form.take_files("image").is_empty());
        assert_eq!(form.take_files("avatar").len(), 1);
    }

    #[tokio::test]
    async fn non_multipart_body_is_rejected() {
        let request = Request::post("/").body(Body::from("caption=hi")).unwrap();

        assert!(matches!(
            MultipartForm::from_request(request, &()).await,
            Err(ServerError::MultipartRejection(_))
        ));
    }
}
