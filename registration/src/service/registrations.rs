//! Registration lifecycle operations: submission, OTP verification, host
//! approval and rejection, cancellation, and ticket data.

use crate::actions::LifecycleAction;
use crate::error::{Error, Result};
use crate::lifecycle::{self, ApprovalDecision, CancellationDecision, RejectionDecision};
use crate::providers::RefundOutcome;
use crate::service::{ServiceEnvironment, dispatch, persist_payment, persist_registration};
use crate::state::LifecycleState;
use crate::ticket::{TicketDocument, is_ticket_eligible};
use crate::types::{
    Answer, Email, Event, QuestionDefinition, QuestionType, Registration, RegistrationId,
    RegistrationPaymentStatus, RegistrationStatus, UserId, VerificationPurpose, Viewer,
};
use serde::{Deserialize, Serialize};

/// Incoming registration payload, pre-normalization.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistrationRequest {
    /// Contact email
    pub email: String,
    /// Attendee name
    pub name: String,
    /// Optional phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// Optional social profile link
    #[serde(default)]
    pub social_link: Option<String>,
    /// Custom-question answers
    #[serde(default)]
    pub answers: Vec<AnswerInput>,
}

/// One submitted answer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AnswerInput {
    /// Question key
    pub question_id: String,
    /// Selected or entered values
    pub values: Vec<String>,
}

/// Result of a registration attempt.
#[derive(Clone, Debug)]
pub struct RegistrationOutcome {
    /// The stored registration row
    pub registration: Registration,
    /// Whether the guest still has to verify their email
    pub verification_required: bool,
    /// Whether an existing verified registration was returned idempotently
    pub already_registered: bool,
}

/// Result of a host rejection, including what happened to the money.
#[derive(Clone, Debug)]
pub struct RejectionOutcome {
    /// The rejected registration
    pub registration: Registration,
    /// Refund result, when a completed payment existed
    pub refund: Option<RefundOutcome>,
}

/// Everything a ticket endpoint returns.
#[derive(Clone, Debug)]
pub struct TicketData {
    /// The canonical QR code string
    pub qr_code: String,
    /// Rendered QR image bytes
    pub qr_image: Vec<u8>,
    /// Printable ticket document, for physical events
    pub document: Option<Vec<u8>>,
    /// The registration the ticket belongs to
    pub registration: Registration,
}

/// Orchestrates the registration lifecycle.
#[derive(Clone)]
pub struct RegistrationService {
    env: ServiceEnvironment,
}

impl RegistrationService {
    /// Create a service over the given environment.
    #[must_use]
    pub const fn new(env: ServiceEnvironment) -> Self {
        Self { env }
    }

    /// Register for an event by short id.
    ///
    /// Idempotent for a verified active registration with the same email;
    /// a re-submission before verification overwrites the same row and
    /// triggers a fresh code.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown events, [`Error::Validation`] for
    /// closed events or bad input, [`Error::SoldOut`] at capacity,
    /// [`Error::RateLimited`] when the OTP issue window is exhausted.
    pub async fn register_for_event(
        &self,
        short_id: &str,
        request: RegistrationRequest,
        viewer: Option<&Viewer>,
    ) -> Result<RegistrationOutcome> {
        let event = self.published_event(short_id).await?;
        let email = Email::parse(&request.email)?;

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("name is required"));
        }
        let phone = normalize_optional(request.phone);
        let social_link = match normalize_optional(request.social_link) {
            Some(link) if !link.starts_with("http://") && !link.starts_with("https://") => {
                Some(format!("https://{link}"))
            }
            other => other,
        };

        // A verified active registration is returned idempotently, without
        // re-issuing a code.
        if let Some(existing) = self
            .env
            .registrations
            .find_by_event_and_email(event.id, &email)
            .await?
        {
            if existing.email_verified && existing.status.is_active() {
                return Ok(RegistrationOutcome {
                    registration: existing,
                    verification_required: false,
                    already_registered: true,
                });
            }
        }

        let answers = validate_answers(&event.questions, &request.answers)?;

        let now = self.env.clock.now();
        let mut registration = Registration {
            id: RegistrationId::new(),
            event_id: event.id,
            user_id: viewer.and_then(|viewer| viewer.user_id),
            email,
            name,
            phone,
            social_link,
            answers,
            status: RegistrationStatus::Pending,
            email_verified: false,
            email_verified_at: None,
            payment_status: if event.is_paid() {
                RegistrationPaymentStatus::Pending
            } else {
                RegistrationPaymentStatus::NotRequired
            },
            qr_code: None,
            checked_in: false,
            checked_in_at: None,
            created_at: now,
            updated_at: now,
        };

        // QR placeholder; refreshed again at verification time.
        let (qr_code, _) = self.env.issuer().ensure_qr_code(&registration)?;
        registration.qr_code = Some(qr_code);

        let outcome = self
            .env
            .registrations
            .admit(registration, event.capacity)
            .await?;
        if outcome.already_registered {
            return Ok(RegistrationOutcome {
                registration: outcome.registration,
                verification_required: false,
                already_registered: true,
            });
        }
        let registration = outcome.registration;
        metrics::counter!("guestflow_registrations_admitted_total").increment(1);

        let verification = self
            .env
            .otp()
            .issue(
                &registration.email,
                VerificationPurpose::EventRegistration,
                Some(event.id),
                Some(registration.id),
            )
            .await?;

        let mut state = LifecycleState::new();
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::RegistrationSubmitted {
                registration: registration.clone(),
            },
        )
        .await?;
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::OtpIssued {
                registration_id: registration.id,
                event,
                code: verification.code,
            },
        )
        .await?;

        Ok(RegistrationOutcome {
            registration,
            verification_required: true,
            already_registered: false,
        })
    }

    /// Re-send the verification code, sharing the issue rate limit.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no unverified registration exists for the
    /// address, [`Error::RateLimited`] when the window is exhausted.
    pub async fn resend_verification(&self, short_id: &str, email: &str) -> Result<()> {
        let event = self.published_event(short_id).await?;
        let email = Email::parse(email)?;

        let registration = self
            .env
            .registrations
            .find_by_event_and_email(event.id, &email)
            .await?
            .ok_or(Error::NotFound {
                resource: "registration",
            })?;
        if registration.email_verified {
            return Err(Error::conflict("email is already verified"));
        }

        let verification = self
            .env
            .otp()
            .issue(
                &email,
                VerificationPurpose::EventRegistration,
                Some(event.id),
                Some(registration.id),
            )
            .await?;

        let mut state = LifecycleState::new();
        state.insert_registration(registration.clone());
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::OtpIssued {
                registration_id: registration.id,
                event,
                code: verification.code,
            },
        )
        .await
    }

    /// Verify a registration OTP and apply the post-verification transition.
    ///
    /// # Errors
    ///
    /// OTP errors pass through ([`Error::OtpMismatch`],
    /// [`Error::TooManyAttempts`], ...); [`Error::NotFound`] when no
    /// registration exists for the verified address.
    pub async fn verify_email_otp(
        &self,
        short_id: &str,
        email: &str,
        code: &str,
    ) -> Result<Registration> {
        let event = self.published_event(short_id).await?;
        let email = Email::parse(email)?;

        self.env
            .otp()
            .verify(
                &email,
                VerificationPurpose::EventRegistration,
                Some(event.id),
                code,
            )
            .await?;

        let registration = self
            .env
            .registrations
            .find_by_event_and_email(event.id, &email)
            .await?
            .ok_or(Error::NotFound {
                resource: "registration",
            })?;

        let mut state = LifecycleState::new();
        state.insert_registration(registration.clone());
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::EmailVerified {
                registration_id: registration.id,
                event,
                at: self.env.clock.now(),
            },
        )
        .await?;
        persist_registration(&self.env, &state, registration.id).await?;

        state
            .registration(&registration.id)
            .cloned()
            .ok_or(Error::NotFound {
                resource: "registration",
            })
    }

    /// Host approval: `pending → approved`. Idempotent when already
    /// approved.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for non-hosts, [`Error::Conflict`] when the
    /// registration is unverified, unpaid, or not pending.
    pub async fn approve_registration(
        &self,
        registration_id: RegistrationId,
        host: UserId,
    ) -> Result<Registration> {
        let (registration, event) = self.host_context(registration_id, host).await?;

        if let ApprovalDecision::AlreadyApproved = lifecycle::can_approve(&registration, &event)? {
            return Ok(registration);
        }

        let mut state = LifecycleState::new();
        state.insert_registration(registration.clone());
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::Approved {
                registration_id,
                event,
                at: self.env.clock.now(),
            },
        )
        .await?;
        persist_registration(&self.env, &state, registration_id).await?;

        state
            .registration(&registration_id)
            .cloned()
            .ok_or(Error::NotFound {
                resource: "registration",
            })
    }

    /// Host rejection, refunding a completed payment first. Idempotent when
    /// already rejected; `payment_status` downgrades to refunded only when
    /// the refund actually completed.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for non-hosts, [`Error::Conflict`] for terminal
    /// rows.
    pub async fn reject_registration(
        &self,
        registration_id: RegistrationId,
        host: UserId,
        reason: &str,
    ) -> Result<RejectionOutcome> {
        let (registration, _event) = self.host_context(registration_id, host).await?;

        let decision = lifecycle::can_reject(&registration)?;
        if let RejectionDecision::AlreadyRejected = decision {
            return Ok(RejectionOutcome {
                registration,
                refund: None,
            });
        }

        let mut state = LifecycleState::new();
        state.insert_registration(registration.clone());

        let mut refund_outcome = None;
        if let RejectionDecision::Reject {
            refund_required: true,
        } = decision
        {
            refund_outcome = self
                .automatic_refund(&mut state, registration_id, reason)
                .await?;
        }

        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::Rejected {
                registration_id,
                at: self.env.clock.now(),
            },
        )
        .await?;
        persist_registration(&self.env, &state, registration_id).await?;

        let registration = state
            .registration(&registration_id)
            .cloned()
            .ok_or(Error::NotFound {
                resource: "registration",
            })?;
        Ok(RejectionOutcome {
            registration,
            refund: refund_outcome,
        })
    }

    /// Cancel a registration (guest- or host-initiated).
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] when the viewer neither owns the registration
    /// nor hosts the event, [`Error::Conflict`] for terminal rows.
    pub async fn cancel_registration(
        &self,
        registration_id: RegistrationId,
        viewer: &Viewer,
    ) -> Result<Registration> {
        let registration = self.registration(registration_id).await?;

        let is_host = match viewer.user_id {
            Some(user_id) => {
                self.env
                    .events
                    .is_host(registration.event_id, user_id)
                    .await?
            }
            None => false,
        };
        if !viewer.owns(&registration) && !is_host {
            return Err(Error::forbidden("not your registration"));
        }

        if let CancellationDecision::AlreadyCancelled = lifecycle::can_cancel(&registration)? {
            return Ok(registration);
        }

        let mut state = LifecycleState::new();
        state.insert_registration(registration.clone());
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::Cancelled {
                registration_id,
                at: self.env.clock.now(),
            },
        )
        .await?;
        persist_registration(&self.env, &state, registration_id).await?;

        state
            .registration(&registration_id)
            .cloned()
            .ok_or(Error::NotFound {
                resource: "registration",
            })
    }

    /// Ticket payload, image, and printable document for an eligible
    /// registration.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for strangers, [`Error::Conflict`] when the
    /// registration is not ticket-eligible.
    pub async fn ticket_data(
        &self,
        registration_id: RegistrationId,
        viewer: &Viewer,
        include_document: bool,
    ) -> Result<TicketData> {
        let mut registration = self.registration(registration_id).await?;
        let event = self.event_for(&registration).await?;

        let is_host = match viewer.user_id {
            Some(user_id) => self.env.events.is_host(event.id, user_id).await?,
            None => false,
        };
        if !viewer.owns(&registration) && !is_host {
            return Err(Error::forbidden("not your registration"));
        }
        if !is_ticket_eligible(&registration) {
            return Err(Error::conflict("registration is not ticket-eligible"));
        }

        let issuer = self.env.issuer();
        let (qr_code, changed) = issuer.ensure_qr_code(&registration)?;
        if changed {
            registration.qr_code = Some(qr_code.clone());
            registration.updated_at = self.env.clock.now();
            self.env.registrations.update(&registration).await?;
        }

        let qr_image = self.env.renderer.render_qr(&qr_code)?;
        let document = if include_document && event.venue.is_some() {
            let document = TicketDocument {
                event_title: event.title.clone(),
                venue: event.venue.clone(),
                starts_at: event.starts_at,
                attendee_name: registration.name.clone(),
                attendee_email: registration.email.to_string(),
                qr_code: qr_code.clone(),
            };
            Some(self.env.renderer.render_document(&document)?)
        } else {
            None
        };

        Ok(TicketData {
            qr_code,
            qr_image,
            document,
            registration,
        })
    }

    // ════════════════════════════════════════════════════════════════════
    // Shared lookups
    // ════════════════════════════════════════════════════════════════════

    async fn published_event(&self, short_id: &str) -> Result<Event> {
        let event = self
            .env
            .events
            .by_short_id(short_id)
            .await?
            .ok_or(Error::NotFound { resource: "event" })?;
        if !event.accepts_registrations(self.env.clock.now()) {
            return Err(Error::validation("event is not open for registration"));
        }
        Ok(event)
    }

    async fn registration(&self, id: RegistrationId) -> Result<Registration> {
        self.env
            .registrations
            .get(id)
            .await?
            .ok_or(Error::NotFound {
                resource: "registration",
            })
    }

    async fn event_for(&self, registration: &Registration) -> Result<Event> {
        self.env
            .events
            .by_id(registration.event_id)
            .await?
            .ok_or(Error::NotFound { resource: "event" })
    }

    async fn host_context(
        &self,
        registration_id: RegistrationId,
        host: UserId,
    ) -> Result<(Registration, Event)> {
        let registration = self.registration(registration_id).await?;
        let event = self.event_for(&registration).await?;
        if !self.env.events.is_host(event.id, host).await? {
            return Err(Error::forbidden("host access required"));
        }
        Ok((registration, event))
    }

    /// Refund the completed payment during rejection. Refund failures do not
    /// block the rejection; they are reported back to the host.
    async fn automatic_refund(
        &self,
        state: &mut LifecycleState,
        registration_id: RegistrationId,
        reason: &str,
    ) -> Result<Option<RefundOutcome>> {
        let Some(payment) = self
            .env
            .payments
            .completed_for_registration(registration_id)
            .await?
        else {
            return Ok(None);
        };
        let Some(gateway_payment_id) = payment.gateway_payment_id.clone() else {
            tracing::warn!(payment_id = %payment.id, "completed payment without gateway id; skipping refund");
            return Ok(None);
        };

        state.insert_payment(payment.clone());

        let refund = crate::retry::with_retry(
            &crate::retry::RetryPolicy::default(),
            self.env.config.gateway_timeout,
            || {
                self.env
                    .gateway
                    .create_refund(&gateway_payment_id, payment.amount, reason)
            },
        )
        .await;

        let (refund_id, outcome) = match refund {
            Ok(refund) => (refund.id, refund.outcome),
            Err(error) => {
                tracing::warn!(%error, payment_id = %payment.id, "automatic refund failed");
                return Ok(Some(RefundOutcome::Failed));
            }
        };

        dispatch(
            &self.env,
            state,
            LifecycleAction::RefundApplied {
                payment_id: payment.id,
                refund_id,
                succeeded: outcome == RefundOutcome::Succeeded,
                at: self.env.clock.now(),
            },
        )
        .await?;
        persist_payment(&self.env, state, payment.id).await?;

        Ok(Some(outcome))
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Validate submitted answers against the event's question definitions.
///
/// Answers come back ordered by the question definitions, so the stored
/// mapping is stable whatever order the client sent.
///
/// # Errors
///
/// [`Error::Validation`] for missing required answers, unknown questions,
/// or options outside a choice question's list.
pub fn validate_answers(
    questions: &[QuestionDefinition],
    answers: &[AnswerInput],
) -> Result<Vec<Answer>> {
    for answer in answers {
        if !questions.iter().any(|q| q.id == answer.question_id) {
            return Err(Error::validation(format!(
                "unknown question: {}",
                answer.question_id
            )));
        }
    }

    let mut validated = Vec::with_capacity(questions.len());
    for question in questions {
        let submitted = answers
            .iter()
            .find(|answer| answer.question_id == question.id);
        let values: Vec<String> = submitted
            .map(|answer| {
                answer
                    .values
                    .iter()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if values.is_empty() {
            if question.required {
                return Err(Error::validation(format!(
                    "answer required for: {}",
                    question.label
                )));
            }
            continue;
        }

        match question.question_type {
            QuestionType::Text => {
                if values.len() > 1 {
                    return Err(Error::validation(format!(
                        "expected a single answer for: {}",
                        question.label
                    )));
                }
            }
            QuestionType::SingleChoice => {
                if values.len() != 1 {
                    return Err(Error::validation(format!(
                        "expected exactly one option for: {}",
                        question.label
                    )));
                }
                if !question.options.contains(&values[0]) {
                    return Err(Error::validation(format!(
                        "invalid option for: {}",
                        question.label
                    )));
                }
            }
            QuestionType::MultiChoice => {
                for value in &values {
                    if !question.options.contains(value) {
                        return Err(Error::validation(format!(
                            "invalid option for: {}",
                            question.label
                        )));
                    }
                }
            }
        }

        validated.push(Answer {
            question_id: question.id.clone(),
            values,
        });
    }

    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(
        id: &str,
        required: bool,
        question_type: QuestionType,
        options: &[&str],
    ) -> QuestionDefinition {
        QuestionDefinition {
            id: id.to_string(),
            label: id.to_string(),
            required,
            question_type,
            options: options.iter().map(ToString::to_string).collect(),
        }
    }

    fn answer(id: &str, values: &[&str]) -> AnswerInput {
        AnswerInput {
            question_id: id.to_string(),
            values: values.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn missing_required_answer_fails() {
        let questions = vec![question("diet", true, QuestionType::Text, &[])];
        assert!(matches!(
            validate_answers(&questions, &[]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn optional_answers_may_be_omitted() {
        let questions = vec![question("diet", false, QuestionType::Text, &[])];
        let validated = validate_answers(&questions, &[]).unwrap_or_default();
        assert!(validated.is_empty());
    }

    #[test]
    fn single_choice_enforces_option_membership() {
        let questions = vec![question(
            "size",
            true,
            QuestionType::SingleChoice,
            &["S", "M", "L"],
        )];
        assert!(validate_answers(&questions, &[answer("size", &["M"])]).is_ok());
        assert!(matches!(
            validate_answers(&questions, &[answer("size", &["XXL"])]),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_answers(&questions, &[answer("size", &["S", "M"])]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn multi_choice_allows_subsets_only() {
        let questions = vec![question(
            "days",
            true,
            QuestionType::MultiChoice,
            &["fri", "sat", "sun"],
        )];
        assert!(validate_answers(&questions, &[answer("days", &["fri", "sun"])]).is_ok());
        assert!(matches!(
            validate_answers(&questions, &[answer("days", &["mon"])]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn unknown_questions_are_rejected() {
        assert!(matches!(
            validate_answers(&[], &[answer("ghost", &["boo"])]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn answers_come_back_in_question_order() {
        let questions = vec![
            question("first", false, QuestionType::Text, &[]),
            question("second", false, QuestionType::Text, &[]),
        ];
        let submitted = vec![answer("second", &["b"]), answer("first", &["a"])];
        let validated = validate_answers(&questions, &submitted).unwrap_or_default();
        let order: Vec<&str> = validated
            .iter()
            .map(|answer| answer.question_id.as_str())
            .collect();
        assert_eq!(order, vec!["first", "second"]);
    }
}
