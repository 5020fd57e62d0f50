use ndarray::prelude::*;
use ndarray::NdFloat;
use ndarray_rand::rand::distributions::uniform::SampleUniform;
use ndarray_rand::rand::rngs::StdRng;
use ndarray_rand::rand::SeedableRng;

use super::{argmax_rows, flatten_batch, init_uniform, log_softmax, relu, Network};
use crate::config::ExperimentConfig;
use crate::error::{Error, Result};

/// Affine layer $`x \mapsto W x + b`$ applied to every row of a batch
#[derive(Clone, Debug)]
pub struct Dense<A> {
    /// shape `(outputs, inputs)`
    weight: Array2<A>,
    bias: Array1<A>,
}

impl<A: NdFloat> Dense<A> {
    pub fn new(weight: Array2<A>, bias: Array1<A>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(Error::mismatch("dense bias", &[weight.nrows()], &[bias.len()]));
        }
        Ok(Dense { weight, bias })
    }

    pub fn random(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self
    where
        A: SampleUniform,
    {
        Dense {
            weight: init_uniform((outputs, inputs), inputs, rng),
            bias: init_uniform(outputs, inputs, rng),
        }
    }

    pub fn inputs(&self) -> usize {
        self.weight.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weight.nrows()
    }

    pub fn weight(&self) -> ArrayView2<'_, A> {
        self.weight.view()
    }

    pub fn bias(&self) -> ArrayView1<'_, A> {
        self.bias.view()
    }

    /// # Panics
    /// if `x` does not have [`Dense::inputs`] columns
    pub fn forward(&self, x: ArrayView2<A>) -> Array2<A> {
        x.dot(&self.weight.t()) + &self.bias
    }
}

impl<A: NdFloat> Network<A> for Dense<A> {
    fn apply(&self, input: ArrayViewD<A>) -> Result<ArrayD<A>> {
        let x = flatten_batch(input)?;
        if x.ncols() != self.inputs() {
            return Err(Error::mismatch("dense input", &[self.inputs()], &[x.ncols()]));
        }
        Ok(self.forward(x.view()).into_dyn())
    }
}

/// Dense layers with ReLU in between and log-probabilities out
#[derive(Clone, Debug)]
pub struct Mlp<A> {
    layers: Vec<Dense<A>>,
}

struct Gradients<A> {
    weights: Vec<Array2<A>>,
    biases: Vec<Array1<A>>,
}

impl<A: NdFloat> Mlp<A> {
    pub fn new(layers: Vec<Dense<A>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::mismatch("mlp layers", &[1], &[0]));
        }
        for pair in layers.windows(2) {
            if pair[0].outputs() != pair[1].inputs() {
                return Err(Error::mismatch(
                    "mlp layer sizes",
                    &[pair[0].outputs()],
                    &[pair[1].inputs()],
                ));
            }
        }
        Ok(Mlp { layers })
    }

    /// `sizes = [inputs, hidden.., classes]`
    pub fn random(sizes: &[usize], seed: u64) -> Result<Self>
    where
        A: SampleUniform,
    {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new(
            sizes
                .windows(2)
                .map(|w| Dense::random(w[0], w[1], &mut rng))
                .collect(),
        )
    }

    pub fn layers(&self) -> &[Dense<A>] {
        &self.layers
    }

    pub fn classes(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }

    /// Pre-activations of every layer; the last one holds the logits.
    fn forward_all(&self, x: ArrayView2<A>) -> Vec<Array2<A>> {
        let mut pre = Vec::with_capacity(self.layers.len());
        let mut a = x.to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(a.view());
            if i + 1 < self.layers.len() {
                a = relu(z.clone());
            }
            pre.push(z);
        }
        pre
    }

    fn check_batch(&self, x: &Array2<A>, labels: ArrayView1<usize>) -> Result<()> {
        if x.ncols() != self.layers[0].inputs() {
            return Err(Error::mismatch(
                "mlp input",
                &[self.layers[0].inputs()],
                &[x.ncols()],
            ));
        }
        if x.nrows() != labels.len() {
            return Err(Error::mismatch("mlp labels", &[x.nrows()], &[labels.len()]));
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= self.classes()) {
            return Err(Error::invalid("label", label, "exceeds the number of classes"));
        }
        Ok(())
    }

    /// Mean negative log-likelihood of a batch and its gradients.
    fn backprop(&self, x: ArrayView2<A>, labels: ArrayView1<usize>) -> (A, Gradients<A>) {
        let n = A::from(x.nrows()).unwrap();
        let pre = self.forward_all(x);
        let logp = log_softmax(pre[pre.len() - 1].view());
        let loss = labels
            .iter()
            .enumerate()
            .fold(A::zero(), |acc, (i, &l)| acc - logp[[i, l]])
            / n;

        // d loss / d logits = (softmax - onehot) / n
        let mut dz = logp.mapv(|v| v.exp());
        for (i, &l) in labels.iter().enumerate() {
            dz[[i, l]] -= A::one();
        }
        dz.mapv_inplace(|v| v / n);

        let depth = self.layers.len();
        let mut weights = Vec::with_capacity(depth);
        let mut biases = Vec::with_capacity(depth);
        for k in (0..depth).rev() {
            let input = if k == 0 {
                x.to_owned()
            } else {
                relu(pre[k - 1].clone())
            };
            weights.push(dz.t().dot(&input));
            biases.push(dz.sum_axis(Axis(0)));
            if k > 0 {
                let mut da = dz.dot(&self.layers[k].weight);
                ndarray::Zip::from(&mut da)
                    .and(&pre[k - 1])
                    .for_each(|d, &z| {
                        if z <= A::zero() {
                            *d = A::zero()
                        }
                    });
                dz = da;
            }
        }
        weights.reverse();
        biases.reverse();
        (loss, Gradients { weights, biases })
    }

    /// Mini-batch SGD on the mean negative log-likelihood.
    ///
    /// Batches are taken in order. Returns the mean batch loss of every
    /// epoch.
    ///
    /// **Errors**
    /// - The configured device is not the CPU.
    /// - Inputs and labels disagree in length or a label is out of range.
    pub fn fit(
        &mut self,
        inputs: ArrayViewD<A>,
        labels: ArrayView1<usize>,
        config: &ExperimentConfig,
    ) -> Result<Vec<A>> {
        config.require_cpu()?;
        let x = flatten_batch(inputs)?;
        self.check_batch(&x, labels)?;
        if x.nrows() == 0 {
            return Err(Error::InvalidConfig("no training samples".into()));
        }
        let lr = A::from(config.learning_rate()).unwrap();
        let batch_size = config.batch_size();
        let batches = (x.nrows() + batch_size - 1) / batch_size;

        let mut history = Vec::with_capacity(config.epochs());
        for epoch in 1..=config.epochs() {
            let mut total = A::zero();
            for (b, (xb, lb)) in x
                .axis_chunks_iter(Axis(0), batch_size)
                .zip(labels.axis_chunks_iter(Axis(0), batch_size))
                .enumerate()
            {
                let (loss, grads) = self.backprop(xb, lb);
                for ((layer, gw), gb) in self
                    .layers
                    .iter_mut()
                    .zip(&grads.weights)
                    .zip(&grads.biases)
                {
                    layer.weight.scaled_add(-lr, gw);
                    layer.bias.scaled_add(-lr, gb);
                }
                total = total + loss;
                if (b + 1) % config.log_interval() == 0 {
                    log::info!(
                        "epoch {} [{}/{}]: loss = {:.6}",
                        epoch,
                        b + 1,
                        batches,
                        loss.to_f64().unwrap_or(f64::NAN)
                    );
                }
            }
            let mean = total / A::from(batches).unwrap();
            log::debug!("epoch {}: mean loss = {:.6}", epoch, mean.to_f64().unwrap_or(f64::NAN));
            history.push(mean);
        }
        Ok(history)
    }

    /// Fraction of samples whose most likely class is the label.
    pub fn accuracy(&self, inputs: ArrayViewD<A>, labels: ArrayView1<usize>) -> Result<f64> {
        let x = flatten_batch(inputs)?;
        self.check_batch(&x, labels)?;
        let pre = self.forward_all(x.view());
        let predicted = argmax_rows(pre[pre.len() - 1].view());
        let correct = predicted
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count();
        Ok(correct as f64 / labels.len().max(1) as f64)
    }
}

impl<A: NdFloat> Network<A> for Mlp<A> {
    fn apply(&self, input: ArrayViewD<A>) -> Result<ArrayD<A>> {
        let x = flatten_batch(input)?;
        if x.ncols() != self.layers[0].inputs() {
            return Err(Error::mismatch(
                "mlp input",
                &[self.layers[0].inputs()],
                &[x.ncols()],
            ));
        }
        let pre = self.forward_all(x.view());
        Ok(log_softmax(pre[pre.len() - 1].view()).into_dyn())
    }
}
