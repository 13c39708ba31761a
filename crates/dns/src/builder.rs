use super::message::{DnsFlags, DnsMessage, DnsQuestion, DnsRecord, DnsResponseCode};

#[derive(Debug, Clone)]
pub struct DnsMessageBuilder {
    id: u16,
    flags: DnsFlags,
    questions: Vec<DnsQuestion>,
    answers: Vec<DnsRecord>,
    authority_records: Vec<DnsRecord>,
    additional_records: Vec<DnsRecord>,
    response_code: Option<DnsResponseCode>,
}

impl Default for DnsMessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsMessageBuilder {
    /// A builder for a recursive query with no sections.
    pub fn new() -> Self {
        Self {
            id: 0,
            flags: DnsFlags {
                recursion_desired: true,
                ..Default::default()
            },
            questions: Vec::new(),
            answers: Vec::new(),
            authority_records: Vec::new(),
            additional_records: Vec::new(),
            response_code: None,
        }
    }

    /// Start a response to `query`: same id, question and mirrored flags.
    pub fn response_to(query: &DnsMessage) -> Self {
        Self::new()
            .with_id(query.id)
            .with_flags(DnsFlags::response_to(&query.flags))
            .with_questions(query.questions().to_vec())
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    pub fn with_flags(mut self, flags: DnsFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_questions(mut self, questions: Vec<DnsQuestion>) -> Self {
        self.questions = questions;
        self
    }

    pub fn add_question(mut self, question: DnsQuestion) -> Self {
        self.questions.push(question);
        self
    }

    pub fn with_answers(mut self, answers: Vec<DnsRecord>) -> Self {
        self.answers = answers;
        self
    }

    pub fn add_answer(mut self, answer: DnsRecord) -> Self {
        self.answers.push(answer);
        self
    }

    pub fn with_authority_records(mut self, records: Vec<DnsRecord>) -> Self {
        self.authority_records = records;
        self
    }

    pub fn add_authority_record(mut self, record: DnsRecord) -> Self {
        self.authority_records.push(record);
        self
    }

    pub fn add_additional_record(mut self, record: DnsRecord) -> Self {
        self.additional_records.push(record);
        self
    }

    /// Mark the message as a response carrying `response_code`.
    pub fn with_response(mut self, response_code: DnsResponseCode) -> Self {
        self.response_code = Some(response_code);
        self
    }

    pub fn build(self) -> DnsMessage {
        let mut message = DnsMessage::new(
            self.id,
            self.flags,
            self.questions,
            self.answers,
            self.authority_records,
            self.additional_records,
        );

        if let Some(rcode) = self.response_code {
            message.flags.response = true;
            message.set_response_code(rcode);
        }

        message
    }
}
