use super::misc::{BACKGROUND_CLASS, NEGATIVE, POSITIVE};
use crate::common::*;

#[derive(Debug, Clone)]
pub struct ClassificationLossInit {
    /// Number of mined negatives per positive anchor.
    pub neg_pos_ratio: f64,
}

impl ClassificationLossInit {
    pub fn build(self) -> Result<ClassificationLoss> {
        let Self { neg_pos_ratio } = self;
        ensure!(
            neg_pos_ratio.is_finite() && neg_pos_ratio >= 0.0,
            "neg_pos_ratio must be non-negative, but get {}",
            neg_pos_ratio
        );
        Ok(ClassificationLoss { neg_pos_ratio })
    }
}

impl Default for ClassificationLossInit {
    fn default() -> Self {
        Self { neg_pos_ratio: 3.0 }
    }
}

/// Softmax cross-entropy over positive anchors and mined hard negatives.
#[derive(Debug, Clone)]
pub struct ClassificationLoss {
    neg_pos_ratio: f64,
}

impl ClassificationLoss {
    pub fn neg_pos_ratio(&self) -> f64 {
        self.neg_pos_ratio
    }

    pub fn forward(
        &self,
        class_logits: &Tensor,
        class_target: &Tensor,
        positiveness: &Tensor,
    ) -> Result<Tensor> {
        let (_batch_size, _num_anchors, num_classes) = class_logits.size3()?;
        let device = class_logits.device();

        let logits = class_logits.f_reshape(&[-1, num_classes])?;
        let targets = class_target.f_reshape(&[-1])?.to_kind(Kind::Int64);
        let positiveness = positiveness.f_reshape(&[-1])?;
        ensure!(
            targets.size1()? == logits.size()[0] && positiveness.size1()? == logits.size()[0],
            "class_target and positiveness must have one entry per anchor"
        );

        let pos_indexes = positiveness.eq(POSITIVE).nonzero().f_view([-1])?;
        let num_positives = pos_indexes.size1()?;

        if num_positives == 0 {
            debug!("no positive anchors in batch, classification loss is zero");
            return Ok(Tensor::zeros(&[], (Kind::Float, device)));
        }

        let pos_targets = targets.f_index_select(0, &pos_indexes)?;
        {
            let min_class = pos_targets.min().int64_value(&[]);
            let max_class = pos_targets.max().int64_value(&[]);
            ensure!(
                min_class >= 0 && max_class < num_classes,
                "class_target of positive anchors must be in range [0, {}), but get [{}, {}]",
                num_classes,
                min_class,
                max_class
            );
        }

        let neg_indexes = self.select_hard_negatives(&logits, &positiveness, num_positives)?;
        let num_negatives = neg_indexes.size1()?;

        let selected_logits = Tensor::f_cat(
            &[
                logits.f_index_select(0, &pos_indexes)?,
                logits.f_index_select(0, &neg_indexes)?,
            ],
            0,
        )?;
        let selected_targets = Tensor::f_cat(
            &[
                pos_targets,
                Tensor::full(&[num_negatives], BACKGROUND_CLASS, (Kind::Int64, device)),
            ],
            0,
        )?;

        let loss = -selected_logits
            .f_log_softmax(-1, Kind::Float)?
            .f_gather(1, &selected_targets.f_unsqueeze(1)?, false)?
            .f_sum(Kind::Float)?
            / num_positives as f64;

        Ok(loss)
    }

    /// Pick the flattened indexes of the negatives with the largest background loss.
    ///
    /// At most `num_positives * neg_pos_ratio` negatives are returned in
    /// descending order of score. Equal scores keep ascending index order.
    pub fn select_hard_negatives(
        &self,
        logits: &Tensor,
        positiveness: &Tensor,
        num_positives: i64,
    ) -> Result<Tensor> {
        let device = logits.device();
        let neg_indexes = positiveness.eq(NEGATIVE).nonzero().f_view([-1])?;
        let num_needed = (num_positives as f64 * self.neg_pos_ratio).floor() as i64;
        let num_selected = num_needed.min(neg_indexes.size1()?);

        if num_selected <= 0 {
            return Ok(Tensor::zeros(&[0], (Kind::Int64, device)));
        }

        let (index_vec, score_vec) = tch::no_grad(|| -> Result<_> {
            let scores = -logits
                .f_index_select(0, &neg_indexes)?
                .f_log_softmax(-1, Kind::Float)?
                .f_select(1, BACKGROUND_CLASS)?;
            let index_vec = Vec::<i64>::from(&neg_indexes.to_device(Device::Cpu));
            let score_vec = Vec::<f32>::from(&scores.to_device(Device::Cpu));
            Ok((index_vec, score_vec))
        })?;

        let selected: Vec<i64> = izip!(index_vec, score_vec)
            .sorted_by(|(_, lhs), (_, rhs)| rhs.total_cmp(lhs))
            .take(num_selected as usize)
            .map(|(index, _)| index)
            .collect();

        Ok(Tensor::of_slice(&selected).to_device(device))
    }
}
