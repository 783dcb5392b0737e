use async_openai::types::audio::{AudioInput, CreateTranscriptionRequest};
use async_openai::Client;
use relay_types::HostError;

/// Transcribe an uploaded audio clip with the provider's speech-to-text
/// model.
pub async fn transcribe(file_name: &str, bytes: Vec<u8>) -> Result<String, HostError> {
    let model =
        std::env::var("A2A_TRANSCRIBE_MODEL").unwrap_or_else(|_| "whisper-1".to_string());

    let request = CreateTranscriptionRequest {
        file: AudioInput::from_vec_u8(file_name.to_string(), bytes),
        model,
        ..Default::default()
    };

    let client = Client::new();
    let response = client
        .audio()
        .transcription()
        .create(request)
        .await
        .map_err(|e| HostError::Other(anyhow::anyhow!(e)))?;
    Ok(response.text)
}
