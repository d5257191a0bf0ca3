// Copyright 2026 The mel_adversary authors.
// SPDX-License-Identifier: Apache-2.0

//! Adversarial training orchestrator.
//!
//! [`MelGenerator`] owns the generator, the discriminator and the
//! discriminator's optimizer, and borrows the ASR and speaker models through
//! shared handles. Each training step is one synchronous forward, backward
//! and optimizer cycle:
//!
//! 1. the discriminator learns real (input) vs fake (detached generator
//!    output) with its own Adam optimizer;
//! 2. the generator minimises `asr_loss / speaker_loss + adversarial_loss`,
//!    with gradients flowing through the frozen ASR and speaker models;
//! 3. separately, the speaker recognizer learns to identify speakers from
//!    generated mels.
//!
//! The generator and speaker optimizers are bound by the caller before the
//! corresponding step is used.

use std::cell::RefCell;
use std::rc::Rc;

use tch::nn::{self, OptimizerConfig};

use crate::config::TrainingConfig;
use crate::discriminator::{ConvDiscriminator, Discriminator};
use crate::error::{MelGenError, Result};
use crate::generator::Generator;
use crate::metrics::{reconstruction_mse, BinaryAccuracy};
use crate::models::{
    post_processor_from_config, MelPostProcessor, SpeakerRecognizer, SpeechRecognizer,
    TrainableModule,
};
use crate::scheduler::{LrScheduler, ScheduledOptimizer, SchedulerState};
use crate::tensor::{no_grad, DType, Tensor};
use crate::types::{
    DiscriminatorStepOutput, GeneratorStepOutput, SpeakerStepOutput, ValidationOutput,
};

/// Shared handle to the ASR model.
pub type SharedSpeechRecognizer = Rc<RefCell<dyn SpeechRecognizer>>;

/// Shared handle to the speaker recognizer.
pub type SharedSpeakerRecognizer = Rc<RefCell<dyn SpeakerRecognizer>>;

/// Adversarial mel generator trainer.
pub struct MelGenerator<D: Discriminator = ConvDiscriminator> {
    generator: Generator,
    discriminator: D,
    disc_optimizer: nn::Optimizer,
    accuracy: BinaryAccuracy,
    asr: SharedSpeechRecognizer,
    speaker: SharedSpeakerRecognizer,
    post_processor: Box<dyn MelPostProcessor>,
    gen_optimizer: Option<ScheduledOptimizer>,
    spk_optimizer: Option<ScheduledOptimizer>,
    config: TrainingConfig,
}

impl MelGenerator<ConvDiscriminator> {
    /// Build a trainer with a freshly initialised generator and
    /// [`ConvDiscriminator`].
    pub fn new(
        asr: SharedSpeechRecognizer,
        speaker: SharedSpeakerRecognizer,
        config: &TrainingConfig,
    ) -> Result<Self> {
        let discriminator = ConvDiscriminator::new(
            &config.discriminator,
            config.generator.in_channels,
            config.device,
        )?;
        Self::with_discriminator(asr, speaker, discriminator, config)
    }
}

impl<D: Discriminator> MelGenerator<D> {
    /// Build a trainer around a caller-supplied discriminator.
    pub fn with_discriminator(
        asr: SharedSpeechRecognizer,
        speaker: SharedSpeakerRecognizer,
        discriminator: D,
        config: &TrainingConfig,
    ) -> Result<Self> {
        let generator = Generator::new(&config.generator, config.device)?;
        let disc = &config.discriminator;
        let disc_optimizer = nn::adam(disc.beta1, disc.beta2, 0.0)
            .build(discriminator.var_store(), disc.learning_rate)?;

        tracing::info!(
            "MelGenerator ready on {:?}: discriminator Adam lr={} betas=({}, {})",
            config.device,
            disc.learning_rate,
            disc.beta1,
            disc.beta2
        );

        Ok(Self {
            generator,
            discriminator,
            disc_optimizer,
            accuracy: BinaryAccuracy::default(),
            asr,
            speaker,
            post_processor: post_processor_from_config(config.post_process),
            gen_optimizer: None,
            spk_optimizer: None,
            config: config.clone(),
        })
    }

    /// Replace the mel post-processor applied before the speaker and ASR models.
    pub fn set_post_processor(&mut self, post_processor: Box<dyn MelPostProcessor>) {
        self.post_processor = post_processor;
    }

    /// Bind the generator optimizer and its scheduler. The optimizer must have
    /// been built over [`generator_var_store`](Self::generator_var_store).
    pub fn set_gen_optimizer(
        &mut self,
        optimizer: nn::Optimizer,
        scheduler: Box<dyn LrScheduler>,
    ) {
        let min_lr = self.config.mel_generator.min_lr;
        self.gen_optimizer = Some(ScheduledOptimizer::new(optimizer, scheduler, min_lr));
    }

    /// Bind the speaker-recognizer optimizer and its scheduler.
    pub fn set_spk_optimizer(
        &mut self,
        optimizer: nn::Optimizer,
        scheduler: Box<dyn LrScheduler>,
    ) {
        let min_lr = self.config.speaker_recognition.min_lr;
        self.spk_optimizer = Some(ScheduledOptimizer::new(optimizer, scheduler, min_lr));
    }

    fn bound<'a>(
        slot: &'a mut Option<ScheduledOptimizer>,
        name: &'static str,
    ) -> Result<&'a mut ScheduledOptimizer> {
        slot.as_mut().ok_or(MelGenError::MissingOptimizer(name))
    }

    /// Generate a transformed mel batch.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.generator.forward(x)
    }

    /// One discriminator optimizer cycle: `real` against ones, the detached
    /// `generated` batch against zeros. No gradient reaches the generator.
    pub fn discriminator_step(
        &mut self,
        real: &Tensor,
        generated: &Tensor,
    ) -> Result<DiscriminatorStepOutput> {
        let batch = real.size().first().copied().unwrap_or(0);
        let ones = Tensor::ones(&[batch], DType::Float32, real.device());
        let zeros = Tensor::zeros(&[batch], DType::Float32, real.device());

        self.disc_optimizer.zero_grad();
        let (real_loss, real_out) = self.discriminator.loss(real, &ones)?;
        let (fake_loss, fake_out) = self.discriminator.loss(&generated.detach(), &zeros)?;

        let fake_acc = self.accuracy.compute(&fake_out, &zeros)?;
        let real_acc = self.accuracy.compute(&real_out, &ones)?;
        let accuracy = (fake_acc + real_acc) / 2.0;

        let loss = &real_loss + &fake_loss;
        loss.backward()?;
        self.disc_optimizer.step();

        let loss = loss.item();
        tracing::debug!(
            "discriminator step: loss={:.4}, acc={:.3} (real {:.3}, fake {:.3})",
            loss,
            accuracy,
            real_acc,
            fake_acc
        );
        Ok(DiscriminatorStepOutput { loss, accuracy })
    }

    /// One generator update, including the discriminator sub-step.
    pub fn train_generator(
        &mut self,
        x: &Tensor,
        tokens: &Tensor,
        labels: &Tensor,
        speaker_labels: &Tensor,
    ) -> Result<GeneratorStepOutput> {
        Self::bound(&mut self.gen_optimizer, "generator")?;

        let asr_handle = Rc::clone(&self.asr);
        let speaker_handle = Rc::clone(&self.speaker);
        let mut asr = asr_handle
            .try_borrow_mut()
            .map_err(|_| MelGenError::ModelBusy("asr"))?;
        let mut speaker = speaker_handle
            .try_borrow_mut()
            .map_err(|_| MelGenError::ModelBusy("speaker"))?;

        // Gradients pass through the recognizers; only their dropout changes
        self.generator.train();
        asr.eval();
        speaker.eval();

        Self::bound(&mut self.gen_optimizer, "generator")?.zero_grad();
        self.generator.zero_grad();
        self.discriminator.zero_grad();
        asr.zero_grad();
        speaker.zero_grad();

        let generated = self.generator.forward(x)?;

        let disc = self.discriminator_step(x, &generated)?;

        let processed = self.post_processor.process(&generated);
        let (speaker_loss, speaker_output) = speaker.loss(&processed, speaker_labels)?;
        let (asr_loss, asr_output) = asr.loss(&processed, tokens, labels, false)?;

        let batch = generated.size()[0];
        let real_labels = Tensor::ones(&[batch], DType::Float32, generated.device());
        let (adversarial_loss, _) = self.discriminator.loss(&generated, &real_labels)?;

        let total = &asr_loss / &speaker_loss + &adversarial_loss;
        total.backward()?;

        let gen_optimizer = Self::bound(&mut self.gen_optimizer, "generator")?;
        gen_optimizer.step();

        let mse = reconstruction_mse(&generated, x)?;

        Ok(GeneratorStepOutput {
            total_loss: total.item(),
            speaker_output: speaker_output.detach(),
            asr_output: asr_output.detach(),
            mse,
            speaker_loss: speaker_loss.item(),
            asr_loss: asr_loss.item(),
            adversarial_loss: adversarial_loss.item(),
            discriminator_accuracy: disc.accuracy,
            discriminator_loss: disc.loss,
        })
    }

    /// One speaker-recognizer update on generated mels.
    ///
    /// The generator's mode is left as it is; callers that interleave this
    /// with [`train_generator`](Self::train_generator) get training-mode
    /// dropout here as well.
    pub fn train_speaker_recognizer(
        &mut self,
        x: &Tensor,
        speaker_labels: &Tensor,
    ) -> Result<SpeakerStepOutput> {
        Self::bound(&mut self.spk_optimizer, "speaker recognizer")?;

        let speaker_handle = Rc::clone(&self.speaker);
        let mut speaker = speaker_handle
            .try_borrow_mut()
            .map_err(|_| MelGenError::ModelBusy("speaker"))?;

        speaker.train();
        speaker.zero_grad();
        let spk_optimizer = Self::bound(&mut self.spk_optimizer, "speaker recognizer")?;
        spk_optimizer.zero_grad();

        let generated = self.generator.forward(x)?;
        let processed = self.post_processor.process(&generated);
        let (loss, output) = speaker.loss(&processed, speaker_labels)?;

        loss.backward()?;
        spk_optimizer.step();

        Ok(SpeakerStepOutput {
            loss: loss.item(),
            output: output.detach(),
        })
    }

    /// Evaluate the generator without updating anything.
    ///
    /// Generator, ASR and speaker models are switched to evaluation mode and
    /// stay there; the reported loss is `asr_loss + speaker_loss`.
    pub fn validate_generator(
        &mut self,
        x: &Tensor,
        tokens: &Tensor,
        labels: &Tensor,
        speaker_labels: &Tensor,
    ) -> Result<ValidationOutput> {
        let asr_handle = Rc::clone(&self.asr);
        let speaker_handle = Rc::clone(&self.speaker);
        let mut asr = asr_handle
            .try_borrow_mut()
            .map_err(|_| MelGenError::ModelBusy("asr"))?;
        let mut speaker = speaker_handle
            .try_borrow_mut()
            .map_err(|_| MelGenError::ModelBusy("speaker"))?;

        self.generator.eval();
        asr.eval();
        speaker.eval();

        let generator = &self.generator;
        let post_processor = &self.post_processor;
        no_grad(|| -> Result<ValidationOutput> {
            let generated = generator.forward(x)?;
            let processed = post_processor.process(&generated);
            let (speaker_loss, speaker_output) = speaker.loss(&processed, speaker_labels)?;
            let (asr_loss, asr_output) = asr.loss(&processed, tokens, labels, false)?;
            let loss = &asr_loss + &speaker_loss;
            let mse = reconstruction_mse(&generated, x)?;

            Ok(ValidationOutput {
                loss: loss.item(),
                speaker_output,
                asr_output,
                mse,
                speaker_loss: speaker_loss.item(),
                asr_loss: asr_loss.item(),
            })
        })
    }

    /// The generator.
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// Mutable access to the generator, e.g. to switch its mode.
    pub fn generator_mut(&mut self) -> &mut Generator {
        &mut self.generator
    }

    /// Variable store to build the generator optimizer over.
    pub fn generator_var_store(&self) -> &nn::VarStore {
        self.generator.var_store()
    }

    /// The discriminator.
    pub fn discriminator(&self) -> &D {
        &self.discriminator
    }

    /// Floor latch of the generator scheduler, `None` before binding.
    pub fn generator_scheduler_state(&self) -> Option<SchedulerState> {
        self.gen_optimizer.as_ref().map(ScheduledOptimizer::state)
    }

    /// Floor latch of the speaker scheduler, `None` before binding.
    pub fn speaker_scheduler_state(&self) -> Option<SchedulerState> {
        self.spk_optimizer.as_ref().map(ScheduledOptimizer::state)
    }

    /// Current generator learning rate, `None` before binding.
    pub fn generator_lr(&self) -> Option<f64> {
        self.gen_optimizer.as_ref().map(ScheduledOptimizer::lr)
    }

    /// Current speaker-recognizer learning rate, `None` before binding.
    pub fn speaker_lr(&self) -> Option<f64> {
        self.spk_optimizer.as_ref().map(ScheduledOptimizer::lr)
    }

    /// Configuration the trainer was built with.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeneratorConfig;
    use crate::models::Mode;
    use crate::scheduler::ExponentialLr;
    use crate::tensor::Device;

    /// Recognizer whose loss is a constant tied to the input graph.
    struct ConstantModel {
        vs: nn::VarStore,
        mode: Mode,
        value: f64,
    }

    impl ConstantModel {
        fn shared(value: f64) -> Rc<RefCell<Self>> {
            let vs = nn::VarStore::new(tch::Device::Cpu);
            let _ = vs.root().var("scale", &[1], nn::Init::Const(1.0));
            Rc::new(RefCell::new(Self {
                vs,
                mode: Mode::Training,
                value,
            }))
        }

        fn constant_loss(&self, melspec: &Tensor) -> (Tensor, Tensor) {
            let loss = melspec.mean_all() * 0.0 + self.value;
            (loss, melspec.mean_dim(&[1, 2], false))
        }
    }

    impl TrainableModule for ConstantModel {
        fn var_store(&self) -> &nn::VarStore {
            &self.vs
        }
        fn mode(&self) -> Mode {
            self.mode
        }
        fn set_mode(&mut self, mode: Mode) {
            self.mode = mode;
        }
    }

    impl SpeakerRecognizer for ConstantModel {
        fn loss(&self, melspec: &Tensor, _speaker_labels: &Tensor) -> Result<(Tensor, Tensor)> {
            Ok(self.constant_loss(melspec))
        }
    }

    impl SpeechRecognizer for ConstantModel {
        fn loss(
            &self,
            melspec: &Tensor,
            _tokens: &Tensor,
            _labels: &Tensor,
            encoder_no_grad: bool,
        ) -> Result<(Tensor, Tensor)> {
            assert!(!encoder_no_grad);
            Ok(self.constant_loss(melspec))
        }
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            generator: GeneratorConfig {
                feedforward_dim: 64,
                max_length: 64,
                ..GeneratorConfig::default()
            },
            ..TrainingConfig::default()
        }
    }

    fn labels() -> (Tensor, Tensor, Tensor) {
        let tokens = Tensor::zeros(&[2, 4], DType::Int64, Device::Cpu);
        let labels = Tensor::zeros(&[2, 4], DType::Int64, Device::Cpu);
        let speakers = Tensor::zeros(&[2], DType::Int64, Device::Cpu);
        (tokens, labels, speakers)
    }

    fn trainer(asr: f64, spk: f64) -> (MelGenerator, Rc<RefCell<ConstantModel>>) {
        let asr_model = ConstantModel::shared(asr);
        let spk_model = ConstantModel::shared(spk);
        let trainer = MelGenerator::new(asr_model, spk_model.clone(), &config()).unwrap();
        (trainer, spk_model)
    }

    fn bind_generator(trainer: &mut MelGenerator) {
        let opt = nn::adam(0.9, 0.98, 0.0)
            .build(trainer.generator_var_store(), 1e-4)
            .unwrap();
        trainer.set_gen_optimizer(opt, Box::new(ExponentialLr::new(1e-4, 0.5)));
    }

    #[test]
    fn test_missing_generator_optimizer() {
        let (mut trainer, _) = trainer(1.0, 1.0);
        let (tokens, labels, speakers) = labels();
        let x = Tensor::randn(&[2, 80, 16], Device::Cpu);
        let result = trainer.train_generator(&x, &tokens, &labels, &speakers);
        assert!(matches!(result, Err(MelGenError::MissingOptimizer("generator"))));
        assert_eq!(trainer.generator_scheduler_state(), None);
    }

    #[test]
    fn test_missing_speaker_optimizer() {
        let (mut trainer, _) = trainer(1.0, 1.0);
        let (_, _, speakers) = labels();
        let x = Tensor::randn(&[2, 80, 16], Device::Cpu);
        assert!(matches!(
            trainer.train_speaker_recognizer(&x, &speakers),
            Err(MelGenError::MissingOptimizer(_))
        ));
    }

    #[test]
    fn test_generator_step_combines_losses() {
        let (mut trainer, spk_model) = trainer(3.0, 2.0);
        bind_generator(&mut trainer);
        let (tokens, labels, speakers) = labels();
        let x = Tensor::randn(&[2, 80, 16], Device::Cpu);

        let out = trainer.train_generator(&x, &tokens, &labels, &speakers).unwrap();
        let expected = out.asr_loss / out.speaker_loss + out.adversarial_loss;
        assert!((out.total_loss - expected).abs() < 1e-5);
        assert!((out.asr_loss - 3.0).abs() < 1e-6);
        assert!((out.speaker_loss - 2.0).abs() < 1e-6);
        assert!((0.0..=1.0).contains(&out.discriminator_accuracy));
        assert!(out.mse >= 0.0);
        assert!(!out.speaker_output.requires_grad());

        assert_eq!(trainer.generator().mode(), Mode::Training);
        assert_eq!(spk_model.borrow().mode(), Mode::Evaluation);
    }

    #[test]
    fn test_busy_speaker_model() {
        let (mut trainer, spk_model) = trainer(1.0, 1.0);
        bind_generator(&mut trainer);
        let (tokens, labels, speakers) = labels();
        let x = Tensor::randn(&[2, 80, 16], Device::Cpu);

        let _guard = spk_model.borrow();
        assert!(matches!(
            trainer.train_generator(&x, &tokens, &labels, &speakers),
            Err(MelGenError::ModelBusy("speaker"))
        ));
    }

    #[test]
    fn test_discriminator_step_isolated_from_generator() {
        let (mut trainer, _) = trainer(1.0, 1.0);
        let x = Tensor::randn(&[2, 80, 16], Device::Cpu);
        let generated = trainer.forward(&x).unwrap();

        let out = trainer.discriminator_step(&x, &generated).unwrap();
        assert!((0.0..=1.0).contains(&out.accuracy));
        assert!(out.loss > 0.0);

        for param in trainer.generator().parameters() {
            if let Some(grad) = param.grad() {
                assert!(grad.to_vec_f32().iter().all(|g| *g == 0.0));
            }
        }
        assert!(trainer
            .discriminator()
            .parameters()
            .iter()
            .any(|p| p.grad().is_some()));
    }

    #[test]
    fn test_validation_uses_sum_and_eval_mode() {
        let (mut trainer, spk_model) = trainer(3.0, 2.0);
        let (tokens, labels, speakers) = labels();
        let x = Tensor::randn(&[2, 80, 16], Device::Cpu);

        let out = trainer.validate_generator(&x, &tokens, &labels, &speakers).unwrap();
        assert!((out.loss - 5.0).abs() < 1e-6);
        assert_eq!(trainer.generator().mode(), Mode::Evaluation);
        assert_eq!(spk_model.borrow().mode(), Mode::Evaluation);
        assert!(!out.asr_output.requires_grad());
    }
}
